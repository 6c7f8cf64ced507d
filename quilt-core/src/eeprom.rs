//! Flash-page calibration storage.
//!
//! Displays keep their legacy visual config in a small serial flash reached
//! through 68-byte HID feature reports. This module implements the framing;
//! the device itself sits behind [`FlashTransport`].
//!
//! ## Storage layout
//!
//! ```text
//! page 0                               page 1..
//! ┌──────────────┬──────────────────┐  ┌───────────────────────┐
//! │ len (u32 BE) │ JSON[0..60]      │  │ JSON[60..124]         │ ...
//! └──────────────┴──────────────────┘  └───────────────────────┘
//!      4 bytes        60 bytes                 64 bytes
//! ```
//!
//! ## Report layout
//!
//! ```text
//! [0] report id (0)
//! [1] command: 0x00 read | 0x80 | crc7 write | 0x40 commit
//! [2] page address, high byte
//! [3] page address, low byte
//! [4..68] page data (commit: start page at 2..4, end page at 4..6)
//! ```
//!
//! The device echoes bytes 1..4 in its reply; a mismatch aborts the transfer.

use std::collections::BTreeMap;

use crate::error::{CalibrationError, CalibrationResult};
use crate::legacy::LegacyConfig;

/// Bytes per flash page.
pub const PAGE_LEN: usize = 64;
/// Address bytes following the command byte.
pub const ADDR_LEN: usize = 3;
/// Feature report length.
pub const REPORT_LEN: usize = PAGE_LEN + ADDR_LEN + 1;
/// Number of addressable pages.
pub const MAX_PAGES: usize = 1024 / PAGE_LEN;
/// Total storage capacity in bytes.
pub const CAPACITY: usize = PAGE_LEN * MAX_PAGES;
/// Length prefix size.
pub const LENGTH_PREFIX: usize = 4;

/// Read command.
pub const CMD_READ: u8 = 0x00;
/// Write command flag; the low seven bits carry the page CRC.
pub const CMD_WRITE: u8 = 0x80;
/// Commit staged pages to flash.
pub const CMD_COMMIT: u8 = 0x40;

const DATA_START: usize = ADDR_LEN + 1;

const CRC7_POLY: u8 = 0x12;

const CRC7_TABLE: [u8; 256] = crc7_table();

const fn crc7_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        #[allow(clippy::cast_possible_truncation)]
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC7_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-7 of a page, as carried in the write command byte.
#[must_use]
pub fn crc7(data: &[u8]) -> u8 {
    let crc = data
        .iter()
        .fold(0u8, |crc, &byte| CRC7_TABLE[usize::from(crc ^ byte)]);
    crc >> 1
}

/// One HID feature report.
pub type Report = [u8; REPORT_LEN];

/// Device side of the flash protocol.
pub trait FlashTransport {
    /// Send a feature report and return the device's reply.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::Transport`] if the device cannot be reached.
    fn exchange(&mut self, report: &Report) -> CalibrationResult<Report>;
}

fn address_bytes(page: u16) -> [u8; 2] {
    page.to_be_bytes()
}

/// Build a read request for `page`.
#[must_use]
pub fn read_report(page: u16) -> Report {
    let mut report = [0u8; REPORT_LEN];
    report[1] = CMD_READ;
    report[2..4].copy_from_slice(&address_bytes(page));
    report
}

/// Build a write request for `page`. Short data is zero padded.
#[must_use]
pub fn write_report(page: u16, data: &[u8]) -> Report {
    let mut report = [0u8; REPORT_LEN];
    report[2..4].copy_from_slice(&address_bytes(page));
    let len = data.len().min(PAGE_LEN);
    report[DATA_START..DATA_START + len].copy_from_slice(&data[..len]);
    report[1] = CMD_WRITE | crc7(&report[DATA_START..]);
    report
}

/// Build a commit request for pages `start..end`.
#[must_use]
pub fn commit_report(start: u16, end: u16) -> Report {
    let mut report = [0u8; REPORT_LEN];
    report[1] = CMD_COMMIT;
    report[2..4].copy_from_slice(&address_bytes(start));
    report[4..6].copy_from_slice(&address_bytes(end));
    report
}

/// Split a payload into length-prefixed pages.
///
/// # Errors
///
/// Returns [`CalibrationError::PayloadTooLarge`] if the prefixed payload exceeds [`CAPACITY`].
pub fn encode_pages(payload: &[u8]) -> CalibrationResult<Vec<[u8; PAGE_LEN]>> {
    let total = payload.len() + LENGTH_PREFIX;
    if total > CAPACITY {
        return Err(CalibrationError::PayloadTooLarge {
            len: total,
            max: CAPACITY,
        });
    }
    // Bounded by CAPACITY above.
    #[allow(clippy::cast_possible_truncation)]
    let prefix = (payload.len() as u32).to_be_bytes();
    let bytes: Vec<u8> = prefix.iter().chain(payload.iter()).copied().collect();

    Ok(bytes
        .chunks(PAGE_LEN)
        .map(|chunk| {
            let mut page = [0u8; PAGE_LEN];
            page[..chunk.len()].copy_from_slice(chunk);
            page
        })
        .collect())
}

/// Number of pages holding a payload whose first page is `first`.
///
/// # Errors
///
/// Returns [`CalibrationError::StorageEmpty`] for erased flash and
/// [`CalibrationError::PayloadTooLarge`] for a corrupt length prefix.
pub fn payload_pages(first: &[u8; PAGE_LEN]) -> CalibrationResult<(usize, usize)> {
    if first[..3] == [0xff, 0xff, 0xff] {
        return Err(CalibrationError::StorageEmpty);
    }
    let len = u32::from_be_bytes([first[0], first[1], first[2], first[3]]) as usize;
    let total = len + LENGTH_PREFIX;
    if total > CAPACITY {
        return Err(CalibrationError::PayloadTooLarge {
            len: total,
            max: CAPACITY,
        });
    }
    Ok((len, total.div_ceil(PAGE_LEN)))
}

/// Reassemble a payload from pages produced by [`encode_pages`].
///
/// # Errors
///
/// Returns [`CalibrationError::StorageEmpty`] for erased or missing pages and
/// [`CalibrationError::PayloadTooLarge`] for a corrupt length prefix.
pub fn decode_pages(pages: &[[u8; PAGE_LEN]]) -> CalibrationResult<Vec<u8>> {
    let first = pages.first().ok_or(CalibrationError::StorageEmpty)?;
    let (len, count) = payload_pages(first)?;
    if pages.len() < count {
        return Err(CalibrationError::Transport(format!(
            "payload needs {count} pages, only {} available",
            pages.len()
        )));
    }
    Ok(pages[..count]
        .iter()
        .flatten()
        .copied()
        .skip(LENGTH_PREFIX)
        .take(len)
        .collect())
}

/// Calibration storage on a flash device.
#[derive(Debug)]
pub struct FlashStorage<T: FlashTransport> {
    transport: T,
}

impl<T: FlashTransport> FlashStorage<T> {
    /// Wrap a transport.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Borrow the transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the transport.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn exchange_checked(&mut self, report: &Report, page: u16) -> CalibrationResult<Report> {
        let reply = self.transport.exchange(report)?;
        if reply[2..4] != report[2..4] {
            return Err(CalibrationError::Transport(format!(
                "reply address mismatch on page {page}"
            )));
        }
        if reply[1] != report[1] {
            if report[1] & CMD_WRITE != 0 {
                return Err(CalibrationError::PageCrc { page });
            }
            return Err(CalibrationError::Transport(format!(
                "reply command mismatch on page {page}"
            )));
        }
        Ok(reply)
    }

    /// Read one page.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the device does not answer correctly.
    pub fn read_page(&mut self, page: u16) -> CalibrationResult<[u8; PAGE_LEN]> {
        let reply = self.exchange_checked(&read_report(page), page)?;
        let mut data = [0u8; PAGE_LEN];
        data.copy_from_slice(&reply[DATA_START..]);
        Ok(data)
    }

    /// Read a length-prefixed payload starting at page 0.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::StorageEmpty`] for erased flash or a transport error.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_payload(&mut self) -> CalibrationResult<Vec<u8>> {
        let first = self.read_page(0)?;
        let (_, count) = payload_pages(&first)?;
        let mut pages = vec![first];
        // count is bounded by MAX_PAGES
        for page in 1..count as u16 {
            pages.push(self.read_page(page)?);
        }
        decode_pages(&pages)
    }

    /// Write a payload starting at page 0 and commit it.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::PayloadTooLarge`], [`CalibrationError::PageCrc`]
    /// or a transport error.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_payload(&mut self, payload: &[u8]) -> CalibrationResult<()> {
        let pages = encode_pages(payload)?;
        for (page, data) in pages.iter().enumerate() {
            let page = page as u16;
            self.exchange_checked(&write_report(page, data), page)?;
        }
        let end = pages.len() as u16;
        self.exchange_checked(&commit_report(0, end), 0)?;
        tracing::debug!("Committed {} flash pages ({} bytes)", end, payload.len());
        Ok(())
    }

    /// Load the stored legacy visual config.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::StorageEmpty`] if nothing is stored, or a
    /// parse/transport error.
    pub fn load_config(&mut self) -> CalibrationResult<LegacyConfig> {
        let payload = self.read_payload()?;
        let text = String::from_utf8(payload).map_err(|e| {
            CalibrationError::InvalidCalibration(format!("flash payload is not UTF-8: {e}"))
        })?;
        let config = LegacyConfig::from_json_str(&text)?;
        tracing::info!("Calibration loaded from device flash, serial {}", config.serial);
        Ok(config)
    }

    /// Store a legacy visual config.
    ///
    /// # Errors
    ///
    /// Returns an error if the config does not fit or the device rejects a page.
    pub fn store_config(&mut self, config: &LegacyConfig) -> CalibrationResult<()> {
        let json = config.to_json_string()?;
        self.write_payload(json.as_bytes())
    }
}

/// In-memory flash device.
///
/// Writes are staged and only become visible after a commit, like the real
/// part. Useful for tests and for working with flash dump files.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    pages: Vec<[u8; PAGE_LEN]>,
    staged: BTreeMap<u16, [u8; PAGE_LEN]>,
    reject_crc: bool,
}

impl Default for MemoryFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFlash {
    /// Erased flash (all `0xff`).
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: vec![[0xff; PAGE_LEN]; MAX_PAGES],
            staged: BTreeMap::new(),
            reject_crc: false,
        }
    }

    /// Load a raw flash dump. Short dumps are padded with erased bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::PayloadTooLarge`] if the dump exceeds [`CAPACITY`].
    pub fn from_image(image: &[u8]) -> CalibrationResult<Self> {
        if image.len() > CAPACITY {
            return Err(CalibrationError::PayloadTooLarge {
                len: image.len(),
                max: CAPACITY,
            });
        }
        let mut flash = Self::new();
        for (page, chunk) in flash.pages.iter_mut().zip(image.chunks(PAGE_LEN)) {
            page[..chunk.len()].copy_from_slice(chunk);
        }
        Ok(flash)
    }

    /// Raw committed contents.
    #[must_use]
    pub fn to_image(&self) -> Vec<u8> {
        self.pages.iter().flatten().copied().collect()
    }

    /// Simulate a device that rejects every written page.
    #[must_use]
    pub fn rejecting_writes(mut self) -> Self {
        self.reject_crc = true;
        self
    }

    fn page_index(page: u16) -> CalibrationResult<usize> {
        let index = usize::from(page);
        if index >= MAX_PAGES {
            return Err(CalibrationError::Transport(format!(
                "page {page} out of range (max {MAX_PAGES})"
            )));
        }
        Ok(index)
    }
}

impl FlashTransport for MemoryFlash {
    fn exchange(&mut self, report: &Report) -> CalibrationResult<Report> {
        let mut reply = *report;
        let page = u16::from_be_bytes([report[2], report[3]]);
        let command = report[1];

        if command == CMD_COMMIT {
            let end = u16::from_be_bytes([report[4], report[5]]);
            for (staged_page, data) in std::mem::take(&mut self.staged) {
                if (page..end).contains(&staged_page) {
                    self.pages[Self::page_index(staged_page)?] = data;
                }
            }
        } else if command & CMD_WRITE != 0 {
            Self::page_index(page)?;
            let mut data = [0u8; PAGE_LEN];
            data.copy_from_slice(&report[DATA_START..]);
            if self.reject_crc || crc7(&data) != command & !CMD_WRITE {
                reply[1] = 0;
            } else {
                self.staged.insert(page, data);
            }
        } else {
            let index = Self::page_index(page)?;
            reply[DATA_START..].copy_from_slice(&self.pages[index]);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc7_table_matches_device() {
        assert_eq!(CRC7_TABLE[0], 0x00);
        assert_eq!(CRC7_TABLE[1], 0x12);
        assert_eq!(CRC7_TABLE[8], 0x90);
        assert_eq!(CRC7_TABLE[64], 0xc8);
        assert_eq!(CRC7_TABLE[128], 0x82);
        assert_eq!(CRC7_TABLE[255], 0xf2);
    }

    #[test]
    fn test_crc7_fits_in_seven_bits() {
        let page: Vec<u8> = (0..=63).collect();
        assert!(crc7(&page) < 0x80);
        assert_eq!(crc7(&[]), 0);
        assert_eq!(crc7(&[1]), 0x12 >> 1);
    }

    #[test]
    fn test_report_layout() {
        let read = read_report(0x0102);
        assert_eq!(read.len(), 68);
        assert_eq!(&read[..4], &[0, CMD_READ, 0x01, 0x02]);

        let data = [0xabu8; PAGE_LEN];
        let write = write_report(3, &data);
        assert_eq!(write[1], CMD_WRITE | crc7(&data));
        assert_eq!(&write[2..4], &[0, 3]);
        assert_eq!(&write[4..], &data[..]);

        let commit = commit_report(0, 5);
        assert_eq!(&commit[..6], &[0, CMD_COMMIT, 0, 0, 0, 5]);
    }

    #[test]
    fn test_encode_pages_prefix_and_padding() {
        let payload = vec![b'x'; 70];
        let pages = encode_pages(&payload).expect("fits");
        assert_eq!(pages.len(), 2);
        assert_eq!(&pages[0][..4], &[0, 0, 0, 70]);
        assert_eq!(pages[1][10], 0);
        assert_eq!(decode_pages(&pages).expect("decode"), payload);
    }

    #[test]
    fn test_encode_pages_too_large() {
        let payload = vec![0u8; CAPACITY - LENGTH_PREFIX + 1];
        assert!(matches!(
            encode_pages(&payload),
            Err(CalibrationError::PayloadTooLarge { max: 1024, .. })
        ));
        assert!(encode_pages(&payload[1..]).is_ok());
    }

    #[test]
    fn test_erased_flash_is_empty() {
        let mut storage = FlashStorage::new(MemoryFlash::new());
        assert!(matches!(
            storage.read_payload(),
            Err(CalibrationError::StorageEmpty)
        ));
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let mut flash = MemoryFlash::new();
        let pages = encode_pages(b"{}").expect("fits");
        let reply = flash.exchange(&write_report(0, &pages[0])).expect("write");
        assert_eq!(reply[1] & CMD_WRITE, CMD_WRITE);
        assert_eq!(flash.to_image()[0], 0xff);

        flash.exchange(&commit_report(0, 1)).expect("commit");
        assert_eq!(&flash.to_image()[..6], &[0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn test_payload_round_trip() {
        let mut storage = FlashStorage::new(MemoryFlash::new());
        let payload: Vec<u8> = (0..200).map(|i| (i % 251) as u8).collect();
        storage.write_payload(&payload).expect("write");
        assert_eq!(storage.read_payload().expect("read"), payload);
    }

    #[test]
    fn test_rejected_page_reports_crc_error() {
        let mut storage = FlashStorage::new(MemoryFlash::new().rejecting_writes());
        let result = storage.write_payload(b"{\"pitch\":{\"value\":50}}");
        assert!(matches!(result, Err(CalibrationError::PageCrc { page: 0 })));
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = LegacyConfig::default();
        config.serial = "LKG-2K-01234".to_string();
        config.set("center", -0.2).expect("known");

        let mut storage = FlashStorage::new(MemoryFlash::new());
        storage.store_config(&config).expect("store");
        let image = storage.into_inner().to_image();

        let mut reloaded = FlashStorage::new(MemoryFlash::from_image(&image).expect("image"));
        assert_eq!(reloaded.load_config().expect("load"), config);
    }

    #[test]
    fn test_image_too_large() {
        assert!(MemoryFlash::from_image(&[0u8; CAPACITY + 1]).is_err());
    }
}
