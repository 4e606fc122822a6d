use crate::error::{Result, SkyError};
use fitrs::{Fits, FitsData, FitsDataArray, Hdu};
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;
/// Stop scanning for END after this many header blocks
const MAX_HEADER_BLOCKS: usize = 64;
/// Sample types the FITS reader decodes
const SUPPORTED_BITPIX: [i64; 4] = [16, 32, -32, -64];

/// Keywords the writer regenerates, never copied from an inherited header
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "BITPIX", "NAXIS", "EXTEND", "BZERO", "BSCALE", "BLANK", "PCOUNT", "GCOUNT", "END",
];

/// Value of a single header card
#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Logical(bool),
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Integer(n) => write!(f, "{}", n),
            CardValue::Real(x) => write!(f, "{}", x),
            CardValue::Text(s) => write!(f, "{}", s),
            CardValue::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
        }
    }
}

/// Ordered FITS header. Lookups return the first card with the keyword.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<(String, CardValue)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, keyword: &str) -> Option<&CardValue> {
        self.cards
            .iter()
            .find(|(key, _)| key == keyword)
            .map(|(_, value)| value)
    }

    /// Replace the first card with this keyword, or append a new one
    pub fn set(&mut self, keyword: impl Into<String>, value: CardValue) {
        let keyword = keyword.into();
        match self.cards.iter_mut().find(|(key, _)| *key == keyword) {
            Some((_, existing)) => *existing = value,
            None => self.cards.push((keyword, value)),
        }
    }

    /// Any card value rendered as text
    pub fn text(&self, keyword: &str) -> Option<String> {
        self.get(keyword).map(|value| value.to_string())
    }

    pub fn integer(&self, keyword: &str) -> Option<i64> {
        match self.get(keyword)? {
            CardValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value of an integer or real card
    pub fn real(&self, keyword: &str) -> Option<f64> {
        match self.get(keyword)? {
            CardValue::Integer(n) => Some(*n as f64),
            CardValue::Real(x) => Some(*x),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CardValue)> {
        self.cards.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Non-negative axis length from an integer card
fn axis_length(header: &Header, keyword: &str) -> std::result::Result<usize, String> {
    let length = header
        .integer(keyword)
        .ok_or_else(|| format!("missing {} header", keyword))?;
    usize::try_from(length).map_err(|_| format!("invalid {}={}", keyword, length))
}

fn is_structural(keyword: &str) -> bool {
    STRUCTURAL_KEYWORDS.contains(&keyword)
        || keyword
            .strip_prefix("NAXIS")
            .is_some_and(|axis| axis.chars().all(|c| c.is_ascii_digit()))
}

/// A loaded image: samples (rows = NAXIS2, columns = NAXIS1) plus header
#[derive(Debug, Clone)]
pub struct Frame {
    pub samples: DMatrix<f64>,
    pub header: Header,
}

impl Frame {
    pub fn new(samples: DMatrix<f64>, header: Header) -> Self {
        Self { samples, header }
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        self.samples.shape()
    }
}

/// Persistent storage for frames
pub trait ImageStore {
    fn load(&self, path: &Path) -> Result<Frame>;

    fn save(&self, path: &Path, samples: &DMatrix<f64>, header: &Header, overwrite: bool) -> Result<()>;
}

/// FITS files on disk, primary HDU only
#[derive(Debug, Default, Clone, Copy)]
pub struct FitsStore;

impl ImageStore for FitsStore {
    fn load(&self, path: &Path) -> Result<Frame> {
        let (header, header_bytes) = read_header_blocks(path)?;

        let naxis = header
            .integer("NAXIS")
            .ok_or_else(|| SkyError::load(path, "missing NAXIS header"))?;
        if naxis != 2 {
            return Err(SkyError::load(
                path,
                format!("expected a 2D image, found NAXIS={}", naxis),
            ));
        }
        let width = axis_length(&header, "NAXIS1").map_err(|e| SkyError::load(path, e))?;
        let height = axis_length(&header, "NAXIS2").map_err(|e| SkyError::load(path, e))?;

        let bitpix = header
            .integer("BITPIX")
            .ok_or_else(|| SkyError::load(path, "missing BITPIX header"))?;
        if !SUPPORTED_BITPIX.contains(&bitpix) {
            return Err(SkyError::load(path, format!("unsupported BITPIX={}", bitpix)));
        }

        // The FITS reader aborts on short data, so the size is checked up front
        let data_bytes = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(bitpix.unsigned_abs() as usize / 8))
            .ok_or_else(|| SkyError::load(path, "image dimensions overflow"))?;
        let file_len = fs::metadata(path).map_err(|e| SkyError::load(path, e))?.len();
        if header_bytes + data_bytes as u64 > file_len {
            return Err(SkyError::load(
                path,
                format!(
                    "truncated data: need {} bytes after the header, file has {}",
                    data_bytes,
                    file_len.saturating_sub(header_bytes)
                ),
            ));
        }

        // Integer data is stored scaled; floats are taken as physical values
        let bzero = header.real("BZERO").unwrap_or(0.0);
        let bscale = header.real("BSCALE").unwrap_or(1.0);

        let fits = Fits::open(path).map_err(|e| SkyError::load(path, e))?;
        let hdu = fits
            .get(0)
            .ok_or_else(|| SkyError::load(path, "no primary HDU"))?;

        let data: Vec<f64> = match hdu.read_data() {
            FitsData::Characters(_) => {
                return Err(SkyError::load(path, "primary HDU holds character data"));
            }
            FitsData::IntegersI32(FitsDataArray { data, .. }) => data
                .iter()
                .map(|raw| match raw {
                    Some(value) => *value as f64 * bscale + bzero,
                    None => f64::NAN,
                })
                .collect(),
            FitsData::IntegersU32(FitsDataArray { data, .. }) => data
                .iter()
                .map(|raw| match raw {
                    Some(value) => *value as f64 * bscale + bzero,
                    None => f64::NAN,
                })
                .collect(),
            FitsData::FloatingPoint32(FitsDataArray { data, .. }) => {
                data.iter().map(|&value| value as f64).collect()
            }
            FitsData::FloatingPoint64(FitsDataArray { data, .. }) => data.to_vec(),
        };

        if data.len() != width * height {
            return Err(SkyError::load(
                path,
                format!(
                    "data size mismatch: expected {} samples, got {}",
                    width * height,
                    data.len()
                ),
            ));
        }

        Ok(Frame::new(DMatrix::from_row_slice(height, width, &data), header))
    }

    fn save(&self, path: &Path, samples: &DMatrix<f64>, header: &Header, overwrite: bool) -> Result<()> {
        let directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        if !directory.is_dir() {
            return Err(SkyError::write(path, "output directory does not exist"));
        }

        if path.exists() {
            if !overwrite {
                return Err(SkyError::write(path, "file exists and overwrite is disabled"));
            }
            fs::remove_file(path).map_err(|e| SkyError::write(path, e))?;
        }

        // FITS stores rows with NAXIS1 varying fastest
        let (rows, columns) = samples.shape();
        let row_major: Vec<f64> = samples.transpose().as_slice().to_vec();
        let mut hdu = Hdu::new(&[columns, rows], row_major);

        for (keyword, value) in header.iter() {
            if is_structural(keyword) {
                continue;
            }
            match value {
                CardValue::Integer(n) => match i32::try_from(*n) {
                    Ok(n) => {
                        hdu.insert(keyword, n);
                    }
                    Err(_) => {
                        tracing::debug!("Writing wide integer card {} as text", keyword);
                        hdu.insert(keyword, n.to_string().as_str());
                    }
                },
                CardValue::Real(x) => {
                    hdu.insert(keyword, *x);
                }
                CardValue::Text(s) => {
                    hdu.insert(keyword, s.as_str());
                }
                CardValue::Logical(_) => {
                    tracing::debug!("Dropping logical card {} from {}", keyword, path.display());
                }
            }
        }

        Fits::create(path, hdu).map_err(|e| SkyError::write(path, e))?;
        Ok(())
    }
}

/// Read the primary header blocks of a FITS file up to the END card
pub fn read_header(path: &Path) -> Result<Header> {
    read_header_blocks(path).map(|(header, _)| header)
}

/// Header plus the number of bytes its blocks occupy
fn read_header_blocks(path: &Path) -> Result<(Header, u64)> {
    let mut file = File::open(path).map_err(|e| SkyError::load(path, e))?;

    let mut header = Header::new();
    let mut block = vec![0u8; BLOCK_SIZE];
    for blocks in 1..=MAX_HEADER_BLOCKS {
        file.read_exact(&mut block)
            .map_err(|e| SkyError::load(path, format!("truncated header: {}", e)))?;

        for card in block.chunks(CARD_SIZE) {
            let card = String::from_utf8_lossy(card);
            if card.trim_end() == "END" {
                return Ok((header, (blocks * BLOCK_SIZE) as u64));
            }
            if let Some((keyword, value)) = parse_card(&card) {
                header.cards.push((keyword, value));
            }
        }
    }

    Err(SkyError::load(path, "no END card in header"))
}

/// Parse one 80-character card of the form `KEYWORD = VALUE / COMMENT`
fn parse_card(card: &str) -> Option<(String, CardValue)> {
    if card.get(8..10) != Some("= ") {
        // COMMENT, HISTORY, blank and commentary cards carry no value
        return None;
    }

    let keyword = card[..8].trim();
    if keyword.is_empty() {
        return None;
    }

    let value_part = card[10..].trim_start();
    let value = if let Some(quoted) = value_part.strip_prefix('\'') {
        CardValue::Text(parse_quoted(quoted))
    } else {
        // Everything before the comment separator
        let raw = value_part.split('/').next().unwrap_or("").trim();
        match raw {
            "" => return None,
            "T" => CardValue::Logical(true),
            "F" => CardValue::Logical(false),
            _ => {
                if let Ok(n) = raw.parse::<i64>() {
                    CardValue::Integer(n)
                } else if let Ok(x) = raw.replace(['D', 'd'], "E").parse::<f64>() {
                    CardValue::Real(x)
                } else {
                    CardValue::Text(raw.to_string())
                }
            }
        }
    };

    Some((keyword.to_string(), value))
}

/// Body of a quoted string value; `''` is an escaped quote, trailing blanks drop
fn parse_quoted(rest: &str) -> String {
    let mut text = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                text.push('\'');
                chars.next();
            } else {
                break;
            }
        } else {
            text.push(c);
        }
    }
    text.trim_end().to_string()
}

/// Frames held in memory, keyed by path
#[derive(Debug, Default)]
pub struct MemoryStore {
    frames: Mutex<BTreeMap<PathBuf, Frame>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, frame: Frame) {
        self.lock().insert(path.into(), frame);
    }

    pub fn get(&self, path: &Path) -> Option<Frame> {
        self.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, Frame>> {
        // A panicked writer cannot leave a half-inserted frame behind
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ImageStore for MemoryStore {
    fn load(&self, path: &Path) -> Result<Frame> {
        self.get(path)
            .ok_or_else(|| SkyError::load(path, "no such frame in memory store"))
    }

    fn save(&self, path: &Path, samples: &DMatrix<f64>, header: &Header, overwrite: bool) -> Result<()> {
        let mut frames = self.lock();
        if !overwrite && frames.contains_key(path) {
            return Err(SkyError::write(path, "frame exists and overwrite is disabled"));
        }
        frames.insert(path.to_path_buf(), Frame::new(samples.clone(), header.clone()));
        Ok(())
    }
}
