//! Character-set metadata needed to reconstruct variable-length record
//! headers and to decode string columns. Only the charsets that show up
//! in practice for `CHAR`/`VARCHAR`/`TEXT` columns are modeled; anything
//! else falls back to `Binary` (raw bytes, no decoding).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InnoDBCharset {
    #[default]
    Ascii,
    Latin1,
    Utf8,
    Utf8mb4,
    /// Not a real MySQL charset: used internally for `BINARY`/`VARBINARY`/
    /// `BLOB` columns, which carry no text semantics.
    Binary,
}

impl InnoDBCharset {
    pub fn with_name(name: &str) -> Option<InnoDBCharset> {
        match name.to_ascii_lowercase().as_str() {
            "ascii" => Some(InnoDBCharset::Ascii),
            "latin1" => Some(InnoDBCharset::Latin1),
            "utf8" | "utf8mb3" => Some(InnoDBCharset::Utf8),
            "utf8mb4" => Some(InnoDBCharset::Utf8mb4),
            "binary" => Some(InnoDBCharset::Binary),
            _ => None,
        }
    }

    /// Maximum bytes per character; used to compute a variable-length
    /// column's declared maximum byte width (spec: utf8mb4 x4, utf8 x3).
    pub fn max_len(&self) -> u64 {
        match self {
            InnoDBCharset::Ascii | InnoDBCharset::Latin1 | InnoDBCharset::Binary => 1,
            InnoDBCharset::Utf8 => 3,
            InnoDBCharset::Utf8mb4 => 4,
        }
    }

    /// Decodes `bytes` as text under this charset. `Ascii`/`Latin1` are
    /// single-byte and map 1:1 onto the first 256 Unicode code points;
    /// `Utf8`/`Utf8mb4` are decoded as UTF-8.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, std::str::Utf8Error> {
        match self {
            InnoDBCharset::Ascii | InnoDBCharset::Latin1 => {
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            InnoDBCharset::Utf8 | InnoDBCharset::Utf8mb4 => {
                Ok(std::str::from_utf8(bytes)?.to_owned())
            }
            // Binary carries no text semantics; callers decode it as
            // `ColumnValue::Bytes` instead and never reach here, but we
            // still give it a well-defined answer rather than panic.
            InnoDBCharset::Binary => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolves_known_names() {
        assert_eq!(InnoDBCharset::with_name("utf8mb4"), Some(InnoDBCharset::Utf8mb4));
        assert_eq!(InnoDBCharset::with_name("LATIN1"), Some(InnoDBCharset::Latin1));
        assert_eq!(InnoDBCharset::with_name("klingon"), None);
    }

    #[test]
    fn max_len_matches_spec_multipliers() {
        assert_eq!(InnoDBCharset::Utf8mb4.max_len(), 4);
        assert_eq!(InnoDBCharset::Utf8.max_len(), 3);
        assert_eq!(InnoDBCharset::Ascii.max_len(), 1);
    }
}
