// src/source/mod.rs

use csv::{ReaderBuilder, StringRecordsIntoIter};
use std::{collections::HashMap, fs, io::Cursor, path::Path};
use tracing::debug;

use crate::error::SourceReadError;

/// One data row: header name → raw field text.
pub type Record = HashMap<String, String>;

/// A source file name inside the quarterly archive and the bronze table it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFileSpec {
    pub file_name: &'static str,
    pub table: &'static str,
}

const fn spec(file_name: &'static str, table: &'static str) -> SourceFileSpec {
    SourceFileSpec { file_name, table }
}

/// Every call report file we import, in import order.
pub static SOURCE_FILES: &[SourceFileSpec] = &[
    spec("FOICU.txt", "bronze_foicu"),
    spec("FS220.txt", "bronze_fs220"),
    spec("FS220A.txt", "bronze_fs220a"),
    spec("FS220B.txt", "bronze_fs220b"),
    spec("FS220C.txt", "bronze_fs220c"),
    spec("FS220D.txt", "bronze_fs220d"),
    spec("FS220G.txt", "bronze_fs220g"),
    spec("FS220H.txt", "bronze_fs220h"),
    spec("FS220I.txt", "bronze_fs220i"),
    spec("FS220J.txt", "bronze_fs220j"),
    spec("FS220K.txt", "bronze_fs220k"),
    spec("FS220L.txt", "bronze_fs220l"),
    spec("FS220M.txt", "bronze_fs220m"),
    spec("FS220N.txt", "bronze_fs220n"),
    spec("FS220P.txt", "bronze_fs220p"),
    spec("FS220Q.txt", "bronze_fs220q"),
    spec("FS220R.txt", "bronze_fs220r"),
    spec("FS220S.txt", "bronze_fs220s"),
];

/// A comma-delimited file with a header line, decoded lossily.
pub struct SourceFile {
    headers: Vec<String>,
    records: StringRecordsIntoIter<Cursor<Vec<u8>>>,
    path: std::path::PathBuf,
}

/// Open `path` and read its header line. Invalid UTF-8 is replaced with U+FFFD
/// rather than failing the file.
pub fn read_source(path: impl AsRef<Path>) -> Result<SourceFile, SourceReadError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| SourceReadError::new(path, e))?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(text.into_bytes()));

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| SourceReadError::new(path, e))?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                h.trim_start_matches('\u{feff}').to_string()
            } else {
                h.to_string()
            }
        })
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(SourceReadError::new(path, "empty header line"));
    }
    debug!(path = %path.display(), columns = headers.len(), "opened source");

    Ok(SourceFile {
        headers,
        records: rdr.into_records(),
        path: path.to_path_buf(),
    })
}

impl SourceFile {
    /// Consume the file, yielding the header list and a lazy row iterator.
    /// Fields missing from short rows are absent from the record.
    pub fn into_parts(
        self,
    ) -> (
        Vec<String>,
        impl Iterator<Item = Result<Record, SourceReadError>>,
    ) {
        let Self {
            headers,
            records,
            path,
        } = self;
        let names = headers.clone();
        let iter = records.map(move |res| {
            let rec = res.map_err(|e| SourceReadError::new(&path, e))?;
            Ok(names
                .iter()
                .zip(rec.iter())
                .map(|(h, v)| (h.clone(), v.to_string()))
                .collect())
        });
        (headers, iter)
    }

    /// Read every row eagerly. The first malformed row fails the file.
    pub fn into_records(self) -> Result<(Vec<String>, Vec<Record>), SourceReadError> {
        let (headers, iter) = self.into_parts();
        let records = iter.collect::<Result<Vec<_>, _>>()?;
        Ok((headers, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(bytes: &[u8]) -> Result<NamedTempFile> {
        let mut f = NamedTempFile::new()?;
        f.write_all(bytes)?;
        Ok(f)
    }

    #[test]
    fn eighteen_distinct_pairings() {
        assert_eq!(SOURCE_FILES.len(), 18);
        let mut tables: Vec<_> = SOURCE_FILES.iter().map(|s| s.table).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), 18);
        for s in SOURCE_FILES {
            let stem = s.file_name.trim_end_matches(".txt").to_lowercase();
            assert_eq!(s.table, format!("bronze_{}", stem));
        }
    }

    #[test]
    fn reads_quoted_rows_in_header_order() -> Result<()> {
        let f = write_tmp(
            b"CU_NUMBER,CYCLE_DATE,CU_NAME,ASSETS\n\"12345\",\"6/30/2025 0:00:00\",\"FIRST, CU\",1000000\n",
        )?;
        let (headers, records) = read_source(f.path())?.into_records()?;
        assert_eq!(headers, vec!["CU_NUMBER", "CYCLE_DATE", "CU_NAME", "ASSETS"]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["CU_NAME"], "FIRST, CU");
        assert_eq!(records[0]["ASSETS"], "1000000");
        Ok(())
    }

    #[test]
    fn invalid_utf8_is_substituted() -> Result<()> {
        let f = write_tmp(b"CU_NUMBER,CU_NAME\n1,CAF\xe9 CU\n")?;
        let (_, records) = read_source(f.path())?.into_records()?;
        assert_eq!(records[0]["CU_NAME"], "CAF\u{fffd} CU");
        Ok(())
    }

    #[test]
    fn bom_is_stripped_and_short_rows_tolerated() -> Result<()> {
        let f = write_tmp("\u{feff}CU_NUMBER,A,B\n7,x\n".as_bytes())?;
        let (headers, records) = read_source(f.path())?.into_records()?;
        assert_eq!(headers[0], "CU_NUMBER");
        assert_eq!(records[0].get("A").map(String::as_str), Some("x"));
        assert!(records[0].get("B").is_none());
        Ok(())
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = read_source("/no/such/FOICU.txt").err().unwrap();
        assert!(err.path.ends_with("FOICU.txt"));
    }
}
