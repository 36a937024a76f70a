//! Upload validation: decide from request metadata alone whether an upload
//! may enter the pipeline.
//!
//! The validator never looks at file content. Checking both the declared
//! media type and the extension means a client cannot get a `.pdf` past us by
//! labelling it with the DOCX content type, nor a DOCX-typed `.exe`.
//!
//! The check is split in two so the HTTP layer can reject a bad type from the
//! multipart part headers before reading a single body byte, and stop reading
//! an oversized body the moment it crosses the cap.

use crate::config::{DOCX_EXTENSION, DOCX_MEDIA_TYPE};
use crate::error::DocxError;
use std::path::Path;

/// What the validator is allowed to look at.
#[derive(Debug, Clone, Copy)]
pub struct UploadMeta<'a> {
    pub filename: &'a str,
    pub media_type: Option<&'a str>,
    pub size: u64,
}

/// Pure predicate over upload metadata.
#[derive(Debug, Clone, Copy)]
pub struct UploadValidator {
    max_bytes: u64,
}

impl UploadValidator {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Full ACCEPT/REJECT decision.
    pub fn check(&self, meta: &UploadMeta<'_>) -> Result<(), DocxError> {
        if meta.filename.trim().is_empty() || meta.size == 0 {
            return Err(DocxError::NoFile);
        }
        self.check_declared(meta.filename, meta.media_type)?;
        self.check_size(meta.size)
    }

    /// Media type and extension half of [`check`](Self::check).
    pub fn check_declared(&self, filename: &str, media_type: Option<&str>) -> Result<(), DocxError> {
        let type_ok = media_type.map(media_type_essence).is_some_and(|essence| {
            essence.eq_ignore_ascii_case(DOCX_MEDIA_TYPE)
        });
        let ext_ok = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(DOCX_EXTENSION));

        if type_ok && ext_ok {
            Ok(())
        } else {
            Err(DocxError::UnsupportedType {
                filename: filename.to_string(),
                media_type: media_type.map(str::to_string),
            })
        }
    }

    /// Size half of [`check`](Self::check). Safe to call repeatedly with a
    /// running total while the body streams in.
    pub fn check_size(&self, size: u64) -> Result<(), DocxError> {
        if size > self.max_bytes {
            Err(DocxError::TooLarge {
                limit: self.max_bytes,
            })
        } else {
            Ok(())
        }
    }
}

/// `type/subtype` without parameters or surrounding whitespace.
fn media_type_essence(raw: &str) -> &str {
    raw.split(';').next().unwrap_or_default().trim()
}
