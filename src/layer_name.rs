//! Parsing and canonicalization of layer file names.
//!
//! A layer file is named after the part of the key/LSN space it covers:
//!
//! ```text
//!    delta: <key start>-<key end>__<LSN start>-<LSN end>
//!    image: <key start>-<key end>__<LSN>
//! ```
//!
//! That is the canonical form, and the only form that appears in local tenant
//! storage. In remote storage a name may additionally carry an opaque
//! generation token after a final `-`; [`local_layer_file_name`] strips it.

use std::fmt;
use std::ops::Range;

use crate::lsn::Lsn;

/// An opaque storage key. The harness never interprets key contents, it only
/// validates and round-trips the fixed 36-hex-digit representation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key([u8; 18]);

impl Key {
    pub fn from_hex(s: &str) -> Option<Key> {
        if s.len() != 36 {
            return None;
        }
        let mut buf = [0u8; 18];
        hex::decode_to_slice(s, &mut buf).ok()?;
        Some(Key(buf))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidLayerName {
    #[error("neither delta nor image layer file name: {0:?}")]
    NotCanonical(String),
    #[error("no generation suffix found: {0:?}")]
    NoGenerationSuffix(String),
}

/// The region of the key/LSN space covered by a delta layer.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct DeltaLayerName {
    pub key_range: Range<Key>,
    pub lsn_range: Range<Lsn>,
}

impl DeltaLayerName {
    /// Parse a string as a delta layer file name. Returns `None` if it does
    /// not match the expected pattern.
    pub fn parse_str(fname: &str) -> Option<Self> {
        let mut parts = fname.split("__");
        let mut key_parts = parts.next()?.split('-');
        let mut lsn_parts = parts.next()?.split('-');

        let key_start_str = key_parts.next()?;
        let key_end_str = key_parts.next()?;
        let lsn_start_str = lsn_parts.next()?;
        let lsn_end_str = lsn_parts.next()?;

        if parts.next().is_some() || key_parts.next().is_some() || lsn_parts.next().is_some() {
            return None;
        }

        let key_start = Key::from_hex(key_start_str)?;
        let key_end = Key::from_hex(key_end_str)?;
        let lsn_start = Lsn::from_hex(lsn_start_str)?;
        let lsn_end = Lsn::from_hex(lsn_end_str)?;

        if key_start >= key_end || lsn_start >= lsn_end {
            return None;
        }

        Some(DeltaLayerName {
            key_range: key_start..key_end,
            lsn_range: lsn_start..lsn_end,
        })
    }
}

impl fmt::Display for DeltaLayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}__{:016X}-{:016X}",
            self.key_range.start,
            self.key_range.end,
            u64::from(self.lsn_range.start),
            u64::from(self.lsn_range.end),
        )
    }
}

/// The region of the key space covered by an image layer, at one LSN.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct ImageLayerName {
    pub key_range: Range<Key>,
    pub lsn: Lsn,
}

impl ImageLayerName {
    /// Parse a string as an image layer file name. Returns `None` if it does
    /// not match the expected pattern.
    pub fn parse_str(fname: &str) -> Option<Self> {
        let mut parts = fname.split("__");
        let mut key_parts = parts.next()?.split('-');

        let key_start_str = key_parts.next()?;
        let key_end_str = key_parts.next()?;
        let lsn_str = parts.next()?;

        if parts.next().is_some() || key_parts.next().is_some() {
            return None;
        }

        let key_start = Key::from_hex(key_start_str)?;
        let key_end = Key::from_hex(key_end_str)?;
        let lsn = Lsn::from_hex(lsn_str)?;

        if key_start >= key_end {
            return None;
        }

        Some(ImageLayerName {
            key_range: key_start..key_end,
            lsn,
        })
    }
}

impl fmt::Display for ImageLayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}__{:016X}",
            self.key_range.start,
            self.key_range.end,
            u64::from(self.lsn),
        )
    }
}

/// The canonical name of an immutable layer file.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum LayerName {
    Image(ImageLayerName),
    Delta(DeltaLayerName),
}

impl LayerName {
    /// Strict parse of the canonical local form.
    pub fn parse(name: &str) -> Result<LayerName, InvalidLayerName> {
        let delta = DeltaLayerName::parse_str(name);
        let image = ImageLayerName::parse_str(name);
        match (delta, image) {
            (None, None) => Err(InvalidLayerName::NotCanonical(name.to_owned())),
            (Some(delta), None) => Ok(Self::Delta(delta)),
            (None, Some(image)) => Ok(Self::Image(image)),
            (Some(_), Some(_)) => unreachable!("delta and image grammars are disjoint"),
        }
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(fname) => fname.fmt(f),
            Self::Delta(fname) => fname.fmt(f),
        }
    }
}

/// Canonicalize a layer file name as found in remote storage.
///
/// Remote names are either the bare canonical form, or the canonical form
/// followed by a generation token whose only known property is that it sits
/// after the last `-`. If stripping everything after the last `-` does not
/// leave a valid canonical name either, the original parse error is returned.
pub fn local_layer_file_name(remote_name: &str) -> Result<LayerName, InvalidLayerName> {
    match LayerName::parse(remote_name) {
        Ok(name) => Ok(name),
        Err(err) => {
            let Some((stripped, _generation)) = remote_name.rsplit_once('-') else {
                return Err(InvalidLayerName::NoGenerationSuffix(remote_name.to_owned()));
            };
            LayerName::parse(stripped).map_err(|_| err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &str =
        "000000000000000000000000000000000000-000000067F00000001000004DF0000000006__00000000014FED58";
    const DELTA: &str =
        "000000000000000000000000000000000000-000000067F00000001000004DF0000000006__00000000014FED58-000000000154C481";

    #[test]
    fn image_layer_parse() {
        let expected = LayerName::Image(ImageLayerName {
            key_range: Key::from_hex("000000000000000000000000000000000000").unwrap()
                ..Key::from_hex("000000067F00000001000004DF0000000006").unwrap(),
            lsn: Lsn::from_hex("00000000014FED58").unwrap(),
        });
        assert_eq!(LayerName::parse(IMAGE).unwrap(), expected);

        // A generation suffix is accepted and stripped on the remote path.
        let remote = format!("{IMAGE}-00000001");
        assert_eq!(local_layer_file_name(&remote).unwrap(), expected);
        assert_eq!(local_layer_file_name(IMAGE).unwrap(), expected);
    }

    #[test]
    fn delta_layer_parse() {
        let expected = LayerName::Delta(DeltaLayerName {
            key_range: Key::from_hex("000000000000000000000000000000000000").unwrap()
                ..Key::from_hex("000000067F00000001000004DF0000000006").unwrap(),
            lsn_range: Lsn::from_hex("00000000014FED58").unwrap()
                ..Lsn::from_hex("000000000154C481").unwrap(),
        });
        assert_eq!(LayerName::parse(DELTA).unwrap(), expected);

        let remote = format!("{DELTA}-0000000a");
        assert_eq!(local_layer_file_name(&remote).unwrap(), expected);
    }

    #[test]
    fn display_roundtrips_canonical_names() {
        for name in [IMAGE, DELTA] {
            assert_eq!(LayerName::parse(name).unwrap().to_string(), name);
        }
    }

    #[test]
    fn suffixed_name_strips_to_the_same_canonical_name() {
        for name in [IMAGE, DELTA] {
            let remote = format!("{name}-deadbeef");
            assert_eq!(
                local_layer_file_name(&remote).unwrap(),
                LayerName::parse(name).unwrap()
            );
        }
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert_eq!(
            LayerName::parse(""),
            Err(InvalidLayerName::NotCanonical("".to_owned()))
        );
        // No delimiter at all: nothing to strip.
        assert_eq!(
            local_layer_file_name("index_part.json"),
            Err(InvalidLayerName::NoGenerationSuffix("index_part.json".to_owned()))
        );
        // Stripping does not help: the original error is reported.
        assert_eq!(
            local_layer_file_name("not-a-layer"),
            Err(InvalidLayerName::NotCanonical("not-a-layer".to_owned()))
        );
    }

    #[test]
    fn rejects_inverted_ranges() {
        // key start == key end
        let name =
            "000000067F00000001000004DF0000000006-000000067F00000001000004DF0000000006__00000000014FED58";
        assert!(LayerName::parse(name).is_err());
        // LSN start >= LSN end
        let name =
            "000000000000000000000000000000000000-000000067F00000001000004DF0000000006__000000000154C481-00000000014FED58";
        assert!(LayerName::parse(name).is_err());
    }
}
