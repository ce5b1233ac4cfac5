//! Character-set conversion for wire strings
//!
//! Every string on the wire is bytes plus an explicit encoding negotiated at
//! the capability exchange. Conversion is delegated to `encoding_rs`.

use std::borrow::Cow;

use encoding_rs::{Encoding as RsEncoding, BIG5, EUC_JP, EUC_KR, GB18030, GBK, KOI8_R, UTF_8, WINDOWS_1252, WINDOWS_1254, WINDOWS_874};

use crate::constants::Locale;
use crate::error::{Error, Result};

/// Server character sets, identified by their wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-8 (code 1)
    #[default]
    Utf8,
    /// GBK (code 2)
    Gbk,
    /// BIG5 (code 3)
    Big5,
    /// ISO-8859-9 (code 4)
    Iso8859_9,
    /// EUC-JP (code 5)
    EucJp,
    /// EUC-KR (code 6)
    EucKr,
    /// KOI8-R (code 7)
    Koi8R,
    /// ISO-8859-1 (code 8)
    Iso8859_1,
    /// ASCII (code 9)
    Ascii,
    /// GB18030 (code 10)
    Gb18030,
    /// ISO-8859-11 (code 11)
    Iso8859_11,
}

impl Encoding {
    /// Look up an encoding by its wire code
    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            1 => Encoding::Utf8,
            2 => Encoding::Gbk,
            3 => Encoding::Big5,
            4 => Encoding::Iso8859_9,
            5 => Encoding::EucJp,
            6 => Encoding::EucKr,
            7 => Encoding::Koi8R,
            8 => Encoding::Iso8859_1,
            9 => Encoding::Ascii,
            10 => Encoding::Gb18030,
            11 => Encoding::Iso8859_11,
            other => return Err(Error::Protocol(format!("unknown server encoding {other}"))),
        })
    }

    /// Wire code of this encoding
    pub fn code(&self) -> i32 {
        match self {
            Encoding::Utf8 => 1,
            Encoding::Gbk => 2,
            Encoding::Big5 => 3,
            Encoding::Iso8859_9 => 4,
            Encoding::EucJp => 5,
            Encoding::EucKr => 6,
            Encoding::Koi8R => 7,
            Encoding::Iso8859_1 => 8,
            Encoding::Ascii => 9,
            Encoding::Gb18030 => 10,
            Encoding::Iso8859_11 => 11,
        }
    }

    fn codec(&self) -> &'static RsEncoding {
        match self {
            Encoding::Utf8 => UTF_8,
            Encoding::Gbk => GBK,
            Encoding::Big5 => BIG5,
            Encoding::Iso8859_9 => WINDOWS_1254,
            Encoding::EucJp => EUC_JP,
            Encoding::EucKr => EUC_KR,
            Encoding::Koi8R => KOI8_R,
            Encoding::Iso8859_1 | Encoding::Ascii => WINDOWS_1252,
            Encoding::Gb18030 => GB18030,
            Encoding::Iso8859_11 => WINDOWS_874,
        }
    }

    /// Maximum bytes one character can take
    pub fn max_char_len(&self) -> usize {
        match self {
            Encoding::Utf8 | Encoding::Gb18030 => 4,
            Encoding::Iso8859_1 | Encoding::Iso8859_9 | Encoding::Iso8859_11 | Encoding::Koi8R | Encoding::Ascii => 1,
            _ => 2,
        }
    }

    /// Convert a Rust string to this encoding
    pub fn encode<'a>(&self, s: &'a str) -> Cow<'a, [u8]> {
        match self {
            Encoding::Utf8 => Cow::Borrowed(s.as_bytes()),
            _ => {
                let (bytes, _, _) = self.codec().encode(s);
                bytes
            }
        }
    }

    /// Convert bytes in this encoding to a Rust string
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let (text, had_errors) = self.codec().decode_without_bom_handling(bytes);
        if had_errors {
            return Err(Error::DataConversion(format!(
                "invalid {} byte sequence",
                self.codec().name()
            )));
        }
        Ok(text.into_owned())
    }

    /// Decode lossily, replacing invalid sequences
    pub fn decode_lossy(&self, bytes: &[u8]) -> String {
        let (text, _) = self.codec().decode_without_bom_handling(bytes);
        text.into_owned()
    }

    /// Encoding used for server error text.
    ///
    /// Korean for a KR locale, BIG5 for an HK locale on a non-UTF-8 server,
    /// GB18030 otherwise.
    pub fn for_error_text(locale: Locale, server: Encoding) -> Encoding {
        match locale {
            Locale::Kr => Encoding::EucKr,
            Locale::ZhHk if server != Encoding::Utf8 => Encoding::Big5,
            _ => Encoding::Gb18030,
        }
    }
}
