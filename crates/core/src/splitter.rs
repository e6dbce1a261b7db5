use crate::error::IngestError;
use lopdf::Document;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PAGE_SUFFIX: &str = "_pg";

/// `<stem>_pg<N>.pdf`, N being the 1-based page number.
pub fn page_file_name(stem: &str, number: u32) -> String {
    format!("{stem}{PAGE_SUFFIX}{number}.pdf")
}

/// Reads the page number back from a split page file name.
pub fn page_index_from_path(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (_, index) = stem.rsplit_once(PAGE_SUFFIX)?;
    index.parse().ok()
}

/// Page files of one document directory, in page order. Files without a page
/// number go last, by name.
pub fn list_page_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if path.is_file() && is_pdf {
            files.push(path);
        }
    }

    files.sort_by(|left, right| {
        let left_key = (page_index_from_path(left).unwrap_or(u32::MAX), left.file_name());
        let right_key = (page_index_from_path(right).unwrap_or(u32::MAX), right.file_name());
        left_key.cmp(&right_key)
    });
    Ok(files)
}

/// Files of `folder` with `extension` that carry a `_pg<N>` index, as
/// `(N, path)` in strictly increasing page order. Unnumbered files are
/// skipped, and of two files with the same index the first by name wins.
pub fn numbered_page_files(
    folder: &Path,
    extension: &str,
) -> Result<Vec<(u32, PathBuf)>, IngestError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if !path.is_file() || !matches {
            continue;
        }
        match page_index_from_path(&path) {
            Some(number) => files.push((number, path)),
            None => debug!(path = %path.display(), "ignoring file without page index"),
        }
    }

    files.sort();
    files.dedup_by_key(|(number, _)| *number);
    Ok(files)
}

/// Writes one single-page PDF per page of `pdf_path` into `output_dir` and
/// returns the number of pages written. Page files left from an earlier run
/// are removed first.
pub fn split_pdf_to_pages(pdf_path: &Path, output_dir: &Path) -> Result<u32, IngestError> {
    fs::create_dir_all(output_dir)?;

    for stale in list_page_files(output_dir)? {
        if let Err(error) = fs::remove_file(&stale) {
            warn!(path = %stale.display(), %error, "could not delete old page file");
        }
    }

    let stem = pdf_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| IngestError::MissingFileName(pdf_path.display().to_string()))?;

    let document =
        Document::load(pdf_path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    let total = page_numbers.len() as u32;

    info!(source = %pdf_path.display(), pages = total, "splitting pdf");

    for &number in &page_numbers {
        let others: Vec<u32> = page_numbers
            .iter()
            .copied()
            .filter(|other| *other != number)
            .collect();

        let mut single = document.clone();
        single.delete_pages(&others);
        single.prune_objects();

        let target = output_dir.join(page_file_name(&stem, number));
        single.save(&target)?;
    }

    Ok(total)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::{dictionary, Object, Stream};
    use tempfile::tempdir;

    pub(crate) fn write_sample_pdf(path: &Path, pages: usize) -> Result<(), Box<dyn std::error::Error>> {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let mut kids = Vec::new();

        for _ in 0..pages {
            let content_id = document.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
            let page_id = document.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);
        document.save(path)?;
        Ok(())
    }

    #[test]
    fn page_index_is_read_after_last_suffix() {
        assert_eq!(page_index_from_path(Path::new("jan_1993_pg12.pdf")), Some(12));
        assert_eq!(page_index_from_path(Path::new("my_pgdoc_pg3.pdf")), Some(3));
        assert_eq!(page_index_from_path(Path::new("notes.pdf")), None);
    }

    #[test]
    fn page_files_sort_numerically() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["doc_pg10.pdf", "doc_pg2.pdf", "doc_pg1.pdf", "stray.pdf", "notes.txt"] {
            fs::write(dir.path().join(name), b"%PDF-1.4")?;
        }

        let names: Vec<String> = list_page_files(dir.path())?
            .iter()
            .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["doc_pg1.pdf", "doc_pg2.pdf", "doc_pg10.pdf", "stray.pdf"]);
        Ok(())
    }

    #[test]
    fn numbered_files_skip_pages_without_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in [
            "jan_1993_pg4.pdf",
            "cover.pdf",
            "jan_1993_pg1.pdf",
            "old_pg4.pdf",
            "jan_1993_pg2.txt",
        ] {
            fs::write(dir.path().join(name), b"%PDF-1.4")?;
        }

        let pages = numbered_page_files(dir.path(), "pdf")?;
        let numbers: Vec<u32> = pages.iter().map(|(number, _)| *number).collect();
        assert_eq!(numbers, vec![1, 4]);
        assert!(pages[1].1.ends_with("jan_1993_pg4.pdf"));

        let text_pages = numbered_page_files(dir.path(), "txt")?;
        assert_eq!(text_pages.len(), 1);
        assert_eq!(text_pages[0].0, 2);
        Ok(())
    }

    #[test]
    fn split_writes_one_file_per_page() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let source = dir.path().join("MAY_1970.pdf");
        write_sample_pdf(&source, 3)?;

        let output = dir.path().join("raw");
        fs::create_dir_all(&output)?;
        fs::write(output.join("may_1970_pg9.pdf"), b"stale")?;

        let written = split_pdf_to_pages(&source, &output)?;
        assert_eq!(written, 3);

        let files = list_page_files(&output)?;
        assert_eq!(files.len(), 3);
        for (index, file) in files.iter().enumerate() {
            assert_eq!(page_index_from_path(file), Some(index as u32 + 1));
            let single = Document::load(file)?;
            assert_eq!(single.get_pages().len(), 1);
        }
        Ok(())
    }

    #[test]
    fn split_rejects_unreadable_pdf() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let source = dir.path().join("broken.pdf");
        fs::write(&source, b"%PDF-1.4\n%broken")?;

        let result = split_pdf_to_pages(&source, &dir.path().join("out"));
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }
}
