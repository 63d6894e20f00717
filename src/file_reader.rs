//! Streaming source reader with automatic gzip decompression
//!
//! Vendor feeds are commonly shipped gzip-compressed. Paths ending in `.gz`
//! (case-insensitive) are decompressed on the fly; `-` reads stdin.
//!
//! ```rust,no_run
//! use georange::file_reader;
//! use std::io::BufRead;
//!
//! let reader = file_reader::open("IP2LOCATION-LITE-DB3.CSV.gz")?;
//! for line in reader.lines() {
//!     println!("{}", line?);
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, stdin, BufRead, BufReader};
use std::path::Path;

/// Buffer size for source reading (128KB)
pub const BUFFER_SIZE: usize = 128 * 1024;

/// Open a source file, decompressing `.gz` files
///
/// # Errors
///
/// Returns an error if the file doesn't exist or can't be opened. Invalid
/// gzip data surfaces later as a read error.
pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();

    if path.to_str() == Some("-") {
        return Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, stdin())));
    }

    let file = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::with_capacity(
            BUFFER_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, file)))
    }
}

/// Whether `path` names a gzip file by extension
pub fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_plain_text_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1.0.0.0,1.0.0.255,AU").unwrap();
        writeln!(file, "1.0.1.0,1.0.3.255,CN").unwrap();
        file.flush().unwrap();

        let reader = open(file.path()).unwrap();
        let lines: Vec<String> = reader.lines().collect::<io::Result<Vec<_>>>().unwrap();

        assert_eq!(lines, vec!["1.0.0.0,1.0.0.255,AU", "1.0.1.0,1.0.3.255,CN"]);
    }

    #[test]
    fn test_gzip_file_case_insensitive() {
        let mut file = NamedTempFile::with_suffix(".CSV.GZ").unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        writeln!(encoder, "compressed 1").unwrap();
        writeln!(encoder, "compressed 2").unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();
        file.flush().unwrap();

        let reader = open(file.path()).unwrap();
        let lines: Vec<String> = reader.lines().collect::<io::Result<Vec<_>>>().unwrap();

        assert_eq!(lines, vec!["compressed 1", "compressed 2"]);
    }

    #[test]
    fn test_missing_file() {
        assert!(open("/nonexistent/georange/source.csv").is_err());
    }
}
