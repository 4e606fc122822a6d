use crate::error::{Result, SkyError};
use crate::fits::Header;
use crate::selection::FrameKind;
use std::path::Path;

/// Length of the zero-padded sequence id in a frame name
const SEQUENCE_LEN: usize = 8;

/// Sequence id and detector character of a frame name like
/// `00747455C4.ramp.new`, located by offset from the end of the name
fn frame_ids(name: &str, kind: FrameKind) -> Result<(&str, char)> {
    let invalid = || SkyError::InvalidFileName {
        name: name.to_string(),
    };

    // <sequence>C<detector><suffix>
    let suffix_len = kind.suffix().len();
    let detector_at = name.len().checked_sub(suffix_len + 1).ok_or_else(invalid)?;
    let sequence_start = detector_at.checked_sub(SEQUENCE_LEN + 1).ok_or_else(invalid)?;

    let sequence = name
        .get(sequence_start..sequence_start + SEQUENCE_LEN)
        .ok_or_else(invalid)?;
    let detector = name
        .get(detector_at..detector_at + 1)
        .and_then(|s| s.chars().next())
        .ok_or_else(invalid)?;
    Ok((sequence, detector))
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SkyError::InvalidFileName {
            name: path.display().to_string(),
        })
}

/// Output name `sky.<FILTER1>-<FILTER2>.<first seq>-<last seq>.C<detector>.fits`.
///
/// Filters come from the header of the last frame, the detector from the
/// first frame's name.
pub fn sky_file_name(kind: FrameKind, first: &Path, last: &Path, header: &Header) -> Result<String> {
    let filter1 = header.text("FILTER1").unwrap_or_else(|| "unknown".to_string());
    let filter2 = header.text("FILTER2").unwrap_or_else(|| "unknown".to_string());

    let (first_sequence, detector) = frame_ids(file_name(first)?, kind)?;
    let (last_sequence, _) = frame_ids(file_name(last)?, kind)?;

    Ok(format!(
        "sky.{}-{}.{}-{}.C{}.fits",
        filter1, filter2, first_sequence, last_sequence, detector
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::CardValue;

    #[test]
    fn test_frame_ids_registered() {
        assert_eq!(
            frame_ids("00747455C4.ramp.new", FrameKind::Registered).unwrap(),
            ("00747455", '4')
        );
    }

    #[test]
    fn test_frame_ids_flat() {
        assert_eq!(
            frame_ids("00747767C2.flat.fits", FrameKind::Flat).unwrap(),
            ("00747767", '2')
        );
    }

    #[test]
    fn test_frame_ids_with_prefix() {
        assert_eq!(
            frame_ids("PRIME_00000123C1.ramp.new", FrameKind::Registered).unwrap(),
            ("00000123", '1')
        );
    }

    #[test]
    fn test_frame_ids_too_short() {
        assert!(matches!(
            frame_ids("C4.ramp.new", FrameKind::Registered),
            Err(SkyError::InvalidFileName { .. })
        ));
    }

    #[test]
    fn test_sky_file_name_from_header() {
        let mut header = Header::new();
        header.set("FILTER1", CardValue::Text("Open".into()));
        header.set("FILTER2", CardValue::Text("J".into()));
        let name = sky_file_name(
            FrameKind::Registered,
            Path::new("/data/C4/00747455C4.ramp.new"),
            Path::new("/data/C4/00747767C4.ramp.new"),
            &header,
        )
        .unwrap();
        assert_eq!(name, "sky.Open-J.00747455-00747767.C4.fits");
    }

    #[test]
    fn test_sky_file_name_unknown_filters() {
        let name = sky_file_name(
            FrameKind::Flat,
            Path::new("00000001C3.flat.fits"),
            Path::new("00000009C3.flat.fits"),
            &Header::new(),
        )
        .unwrap();
        assert_eq!(name, "sky.unknown-unknown.00000001-00000009.C3.fits");
    }
}
