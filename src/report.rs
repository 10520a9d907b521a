//! Introspection report ("scullseq")
//!
//! Renders each device's segment chain as text:
//!
//! ```text
//!
//! Device 0: qset 2, q 4, sz 12
//!   item at segment 0, qset at slots[2]
//!   item at segment 1, qset at slots[2]
//!        0: q#00000003
//! ```
//!
//! Every section opens with a blank line so paged output keeps devices
//! apart. Slot lines are only emitted for the tail segment. Each device section is
//! produced under that device's serializer; the report never mutates state.

use crate::error::Result;
use crate::storage::{Interrupt, ScullDevice, ScullDevices};
use bytes::{Bytes, BytesMut};
use tracing::debug;

/// Render one device's section
pub async fn device_section(device: &ScullDevice, interrupt: &Interrupt) -> Result<Vec<String>> {
    let state = device.lock(interrupt).await?;
    let sizing = state.sizing();

    let mut lines = vec![
        String::new(),
        format!(
            "Device {}: qset {}, q {}, sz {}",
            device.index(),
            sizing.qset,
            sizing.quantum,
            state.size()
        ),
    ];

    for (id, segment) in state.chain().iter() {
        let slots = match segment.slots() {
            Some(slots) => format!("slots[{}]", slots.len()),
            None => "none".to_string(),
        };
        lines.push(format!("  item at segment {}, qset at {}", id, slots));

        if let (true, Some(slots)) = (segment.is_tail(), segment.slots()) {
            for (index, quantum) in slots.iter().enumerate() {
                if let Some(quantum) = quantum {
                    lines.push(format!("    {:4}: {}", index, quantum.id()));
                }
            }
        }
    }

    Ok(lines)
}

/// Full report over every device, one pass
pub async fn report(devices: &ScullDevices, interrupt: &Interrupt) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for device in devices.iter() {
        lines.extend(device_section(device, interrupt).await?);
    }
    Ok(lines)
}

/// Pages the report out in caller-sized chunks
///
/// The cursor names the next device to render; already-rendered text waits
/// in `pending` until consumed. An empty chunk marks the end.
pub struct ReportReader<'a> {
    devices: &'a ScullDevices,
    interrupt: Interrupt,
    cursor: usize,
    pending: BytesMut,
}

impl<'a> ReportReader<'a> {
    pub fn new(devices: &'a ScullDevices, interrupt: Interrupt) -> Self {
        Self {
            devices,
            interrupt,
            cursor: 0,
            pending: BytesMut::new(),
        }
    }

    /// Index of the next device whose section has not been rendered
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Next chunk of at most `max` bytes
    pub async fn read(&mut self, max: usize) -> Result<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }

        if self.pending.is_empty() {
            let Ok(device) = self.devices.get(self.cursor) else {
                return Ok(Bytes::new());
            };
            let lines = device_section(device, &self.interrupt).await?;
            for line in lines {
                self.pending.extend_from_slice(line.as_bytes());
                self.pending.extend_from_slice(b"\n");
            }
            debug!(device = self.cursor, bytes = self.pending.len(), "Rendered report section");
            self.cursor += 1;
        }

        let n = max.min(self.pending.len());
        Ok(self.pending.split_to(n).freeze())
    }

    /// Drain the rest of the report
    pub async fn read_to_string(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            let chunk = self.read(4096).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Start over from the first device
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScullSettings;
    use crate::storage::OpenMode;

    fn devices() -> Result<ScullDevices> {
        ScullDevices::new(&ScullSettings {
            nr_devs: 2,
            quantum: 4,
            qset: 2,
            memory_limit: None,
        })
    }

    #[tokio::test]
    async fn test_empty_devices_report_headers_only() -> Result<()> {
        let devices = devices()?;
        let lines = report(&devices, &Interrupt::new()).await?;
        assert_eq!(
            lines,
            vec![
                String::new(),
                "Device 0: qset 2, q 4, sz 0".to_string(),
                String::new(),
                "Device 1: qset 2, q 4, sz 0".to_string(),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_slot_lines_only_for_tail() -> Result<()> {
        let devices = devices()?;
        let intr = Interrupt::new();
        let mut file = devices.open(0, OpenMode::ReadWrite, &intr).await?;
        file.write_all(b"ABCDEF").await?;
        file.seek(std::io::SeekFrom::Start(12)).await?;
        file.write_all(b"WXYZ").await?;

        let lines = device_section(devices.get(0)?, &intr).await?;
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "Device 0: qset 2, q 4, sz 16");
        assert_eq!(lines[2], "  item at segment 0, qset at slots[2]");
        assert_eq!(lines[3], "  item at segment 1, qset at slots[2]");
        assert_eq!(lines.len(), 5);
        assert!(lines[4].starts_with("       1: q#"));
        Ok(())
    }

    #[tokio::test]
    async fn test_reader_pages_by_device() -> Result<()> {
        let devices = devices()?;
        let intr = Interrupt::new();
        let mut reader = ReportReader::new(&devices, intr);

        let first = reader.read(10).await?;
        assert_eq!(&first[..], b"\nDevice 0:");
        assert_eq!(reader.cursor(), 1);

        let rest = reader.read(100).await?;
        assert_eq!(&rest[..], b" qset 2, q 4, sz 0\n");

        let second = reader.read(100).await?;
        assert_eq!(&second[..], b"\nDevice 1: qset 2, q 4, sz 0\n");
        assert!(reader.read(100).await?.is_empty());

        reader.rewind();
        let all = reader.read_to_string().await?;
        assert_eq!(all, "\nDevice 0: qset 2, q 4, sz 0\n\nDevice 1: qset 2, q 4, sz 0\n");
        Ok(())
    }
}
