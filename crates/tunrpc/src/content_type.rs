//! Versioned media types of the form `type/subtype;version=N`.

use std::borrow::Cow;

use crate::Error;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    ty: Cow<'static, str>,
    version: u32,
}

impl ContentType {
    pub const fn from_static(ty: &'static str, version: u32) -> Self {
        Self { ty: Cow::Borrowed(ty), version }
    }

    pub fn new(ty: impl Into<String>, version: u32) -> Self {
        Self { ty: Cow::Owned(ty.into()), version }
    }

    /// Parses a header value. The type is compared case-insensitively, parameters
    /// other than `version` are ignored, and a missing `version` is an error.
    pub fn parse(header: &str) -> Result<Self> {
        let invalid = || Error::InvalidContentType(header.to_string());
        let mut parts = header.split(';');
        let ty = parts.next().map(str::trim).filter(|t| t.contains('/')).ok_or_else(invalid)?;

        let mut version = None;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else { continue };
            if key.trim().eq_ignore_ascii_case("version") {
                version = Some(value.trim().trim_matches('"').parse::<u32>().map_err(|_| invalid())?);
            }
        }

        Ok(Self::new(ty.to_ascii_lowercase(), version.ok_or_else(invalid)?))
    }

    pub fn ty(&self) -> &str {
        &self.ty
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Same type and same version.
    pub fn matches(&self, other: &ContentType) -> bool {
        self.ty.eq_ignore_ascii_case(&other.ty) && self.version == other.version
    }

    /// Parses `header` and checks it names exactly this type and version.
    pub fn expect(&self, header: Option<&str>) -> Result<()> {
        let header = header.ok_or_else(|| Error::InvalidContentType("<missing>".into()))?;
        let parsed = Self::parse(header)?;
        if self.matches(&parsed) {
            Ok(())
        } else {
            Err(Error::InvalidContentType(header.to_string()))
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};version={}", self.ty, self.version)
    }
}
