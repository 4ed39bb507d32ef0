use std::path::{Path, PathBuf};

use log::debug;

use crate::error::FirmwareError;
use crate::templates::{FirmwareSegment, InitProfile};

/// Contents of the FPGA image uploaded to an uninitialized device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
}

impl FirmwareImage {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FirmwareError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| FirmwareError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded {} byte firmware image {}", bytes.len(), path.display());
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Header followed by the segment's bytes, ready to write.
    pub fn framed_segment(
        &self,
        header: [u8; 4],
        segment: FirmwareSegment,
    ) -> Result<Vec<u8>, FirmwareError> {
        let end = segment.offset + segment.len;
        let body = self
            .bytes
            .get(segment.offset..end)
            .ok_or(FirmwareError::TooShort {
                len: self.bytes.len(),
                needed: end,
            })?;
        let mut out = Vec::with_capacity(header.len() + body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(body);
        Ok(out)
    }

    /// All segments of `profile`, framed.
    pub fn frames(&self, profile: &InitProfile) -> Result<Vec<Vec<u8>>, FirmwareError> {
        profile
            .segments
            .iter()
            .map(|&s| self.framed_segment(profile.segment_header, s))
            .collect()
    }
}

/// Where to take the firmware from. Files are only read when an upload is needed.
#[derive(Debug, Clone)]
pub enum FirmwareSource {
    File(PathBuf),
    Image(FirmwareImage),
}

impl FirmwareSource {
    pub fn image(&self) -> Result<FirmwareImage, FirmwareError> {
        match self {
            FirmwareSource::File(path) => FirmwareImage::load(path),
            FirmwareSource::Image(image) => Ok(image.clone()),
        }
    }
}

impl From<PathBuf> for FirmwareSource {
    fn from(path: PathBuf) -> Self {
        FirmwareSource::File(path)
    }
}

impl From<FirmwareImage> for FirmwareSource {
    fn from(image: FirmwareImage) -> Self {
        FirmwareSource::Image(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn frames_follow_profile() {
        let profile = InitProfile::default();
        let image = FirmwareImage::from_bytes(pattern(profile.firmware_len()));
        let frames = image.frames(&profile).unwrap();
        assert_eq!(2, frames.len());
        assert_eq!(4 + 61_424, frames[0].len());
        assert_eq!(4 + 14_039, frames[1].len());
        assert_eq!([0x05, 0, 0x02, 0], frames[1][..4]);
        assert_eq!((61_424 % 251) as u8, frames[1][4]);
    }

    #[test]
    fn short_image_is_rejected() {
        let profile = InitProfile::default();
        let image = FirmwareImage::from_bytes(pattern(70_000));
        assert!(matches!(
            image.frames(&profile),
            Err(FirmwareError::TooShort { len: 70_000, needed: 75_463 })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&pattern(128)).unwrap();
        let source = FirmwareSource::from(file.path().to_path_buf());
        assert_eq!(128, source.image().unwrap().len());

        let missing = FirmwareSource::File(PathBuf::from("/nonexistent/digiBaseRH.rbf"));
        assert!(matches!(missing.image(), Err(FirmwareError::Io { .. })));
    }
}
