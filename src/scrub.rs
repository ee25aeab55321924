//! Log scrubbing: recover the kickstart document from a job output file that
//! a batch scheduler may have wrapped in its own log banners.
//!
//! The payload is copied byte for byte; nothing is re-indented or re-encoded.

use crate::config::ScrubConfig;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const XML_DECLARATION: &[u8] = b"<?xml";
const INVOCATION_END: &[u8] = b"</invocation>";

/// Where the extractor should read the XML document from.
#[derive(Debug)]
pub enum XmlSource {
    /// The input was already clean and is read in place.
    Original(PathBuf),
    /// Scratch copy of the embedded document. Removed when dropped or released.
    Scrubbed(NamedTempFile),
}

impl XmlSource {
    pub fn path(&self) -> &Path {
        match self {
            XmlSource::Original(path) => path,
            XmlSource::Scrubbed(file) => file.path(),
        }
    }

    pub fn is_scrubbed(&self) -> bool {
        matches!(self, XmlSource::Scrubbed(_))
    }

    /// Remove the scratch copy, if any. A failed removal is logged, never returned.
    pub fn release(self) {
        if let XmlSource::Scrubbed(file) = self {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => tracing::debug!(file = %path.display(), "removed scratch file"),
                Err(e) => tracing::warn!(
                    error = %e,
                    file = %path.display(),
                    "failed to remove scratch file"
                ),
            }
        }
    }
}

/// Errors that can occur while scrubbing an input file.
#[derive(Debug)]
pub enum ScrubError {
    /// Failed to read the input file.
    Io { path: PathBuf, source: std::io::Error },
    /// Failed to create or write the scratch file.
    Scratch { source: std::io::Error },
    /// No line of the input starts an XML document.
    NoDocument { path: PathBuf },
}

impl std::fmt::Display for ScrubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrubError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ScrubError::Scratch { source } => {
                write!(f, "failed to write scratch file: {}", source)
            }
            ScrubError::NoDocument { path } => {
                write!(
                    f,
                    "{} does not contain a kickstart XML document",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ScrubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScrubError::Io { source, .. } => Some(source),
            ScrubError::Scratch { source } => Some(source),
            ScrubError::NoDocument { .. } => None,
        }
    }
}

/// Locate the XML document inside `path`.
///
/// A file whose first line is an XML declaration is returned untouched.
/// Otherwise everything from the first line starting with `<?xml` through the
/// first following line starting with `</invocation>` is copied into a scratch
/// file. If the closing line never appears, the copy runs to end of file and
/// the extractor is left to report the truncated document.
pub fn scrub(path: &Path, config: &ScrubConfig) -> Result<XmlSource, ScrubError> {
    let read_err = |source| ScrubError::Io {
        path: path.to_path_buf(),
        source,
    };
    let scratch_err = |source| ScrubError::Scratch { source };

    let file = std::fs::File::open(path).map_err(read_err)?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut line_num: u64 = 0;
    let mut scratch: Option<BufWriter<NamedTempFile>> = None;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).map_err(read_err)? == 0 {
            break;
        }
        line_num += 1;

        if scratch.is_none() {
            if !line.starts_with(XML_DECLARATION) {
                continue;
            }
            if line_num == 1 {
                tracing::debug!(file = %path.display(), "input is clean XML");
                return Ok(XmlSource::Original(path.to_path_buf()));
            }
            tracing::debug!(
                file = %path.display(),
                line = line_num,
                "found embedded XML declaration"
            );
            scratch = Some(BufWriter::new(
                create_scratch(config).map_err(scratch_err)?,
            ));
        }

        if let Some(out) = scratch.as_mut() {
            out.write_all(&line).map_err(scratch_err)?;
        }
        if line.starts_with(INVOCATION_END) {
            break;
        }
    }

    match scratch {
        Some(out) => {
            let file = out
                .into_inner()
                .map_err(|e| scratch_err(e.into_error()))?;
            tracing::debug!(
                file = %path.display(),
                scratch = %file.path().display(),
                "scrubbed scheduler output"
            );
            Ok(XmlSource::Scrubbed(file))
        }
        None => Err(ScrubError::NoDocument {
            path: path.to_path_buf(),
        }),
    }
}

fn create_scratch(config: &ScrubConfig) -> std::io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".kickstart-").suffix(".xml");
    match &config.scratch_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DOCUMENT: &str = "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n\
<invocation xmlns=\"http://pegasus.isi.edu/schema/invocation\" transformation=\"diamond::findrange\">\n\
  <mainjob duration=\"60.0\"/>\n\
</invocation>\n";

    fn scratch_config(dir: &Path) -> ScrubConfig {
        ScrubConfig {
            scratch_dir: Some(dir.to_path_buf()),
        }
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_clean_input_is_used_in_place() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        std::fs::write(&path, DOCUMENT).unwrap();

        let source = scrub(&path, &scratch_config(scratch.path())).unwrap();
        assert!(!source.is_scrubbed());
        assert_eq!(source.path(), path.as_path());
        assert_eq!(scratch_entries(scratch.path()), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DOCUMENT);
    }

    #[test]
    fn test_prefix_lines_are_dropped_byte_exact() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        let payload = "<?xml version=\"1.0\"?>\r\n<invocation transformation=\"a&amp;b\">\r\n\t<mainjob/>\r\n</invocation>\r\n";
        let contents = format!(
            "PBS prologue started\n=== job 4711 on node17 ===\n\n{payload}"
        );
        std::fs::write(&path, contents).unwrap();

        let source = scrub(&path, &scratch_config(scratch.path())).unwrap();
        assert!(source.is_scrubbed());
        assert!(source.path().starts_with(scratch.path()));
        assert_eq!(std::fs::read(source.path()).unwrap(), payload.as_bytes());
    }

    #[test]
    fn test_trailing_lines_are_dropped() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        std::fs::write(
            &path,
            format!("banner\n{DOCUMENT}PBS epilogue\nresources_used.walltime=00:01:00\n"),
        )
        .unwrap();

        let source = scrub(&path, &scratch_config(scratch.path())).unwrap();
        assert_eq!(std::fs::read_to_string(source.path()).unwrap(), DOCUMENT);
    }

    #[test]
    fn test_no_declaration_is_not_salvageable() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        std::fs::write(&path, "just a log\n<invocation>\n</invocation>\n").unwrap();

        let err = scrub(&path, &scratch_config(scratch.path())).unwrap_err();
        assert!(matches!(err, ScrubError::NoDocument { .. }));
        assert!(err.to_string().contains("does not contain"));
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[test]
    fn test_empty_input_is_not_salvageable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        std::fs::write(&path, "").unwrap();

        let err = scrub(&path, &ScrubConfig::default()).unwrap_err();
        assert!(matches!(err, ScrubError::NoDocument { .. }));
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let err = scrub(Path::new("/nonexistent/job.out.000"), &ScrubConfig::default())
            .unwrap_err();
        assert!(matches!(err, ScrubError::Io { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_closing_line_before_declaration_is_ignored() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        std::fs::write(&path, format!("noise\n</invocation>\n{DOCUMENT}")).unwrap();

        let source = scrub(&path, &scratch_config(scratch.path())).unwrap();
        assert_eq!(std::fs::read_to_string(source.path()).unwrap(), DOCUMENT);
    }

    #[test]
    fn test_missing_closing_line_copies_to_end() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        let truncated = "<?xml version=\"1.0\"?>\n<invocation transformation=\"x\">\n  <mainjob";
        std::fs::write(&path, format!("banner\n{truncated}")).unwrap();

        let source = scrub(&path, &scratch_config(scratch.path())).unwrap();
        assert_eq!(std::fs::read_to_string(source.path()).unwrap(), truncated);
    }

    #[test]
    fn test_release_removes_scratch_file() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        std::fs::write(&path, format!("banner\n{DOCUMENT}")).unwrap();

        let source = scrub(&path, &scratch_config(scratch.path())).unwrap();
        let scratch_path = source.path().to_path_buf();
        assert!(scratch_path.exists());
        source.release();
        assert!(!scratch_path.exists());
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[test]
    fn test_drop_removes_scratch_file() {
        let dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        std::fs::write(&path, format!("banner\n{DOCUMENT}")).unwrap();

        {
            let source = scrub(&path, &scratch_config(scratch.path())).unwrap();
            assert!(source.path().exists());
        }
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[test]
    fn test_release_of_original_keeps_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.out.000");
        std::fs::write(&path, DOCUMENT).unwrap();

        scrub(&path, &ScrubConfig::default()).unwrap().release();
        assert!(path.exists());
    }
}
