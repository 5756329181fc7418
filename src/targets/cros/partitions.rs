//! Root device parsing for A/B partition layouts

use anyhow::{anyhow, bail, Result};

/// Kernel/root partition numbers of the A and B slots
const KERNEL_A: u32 = 2;
const ROOT_A: u32 = 3;
const KERNEL_B: u32 = 4;
const ROOT_B: u32 = 5;

/// MiniOS lives in two fixed partitions on the same disk
pub const MINIOS_PARTITIONS: [u32; 2] = [9, 10];

/// Where the running system lives and where the next image goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    /// Whole-disk device, e.g. `/dev/nvme0n1`
    pub disk: String,
    /// Prefix partition numbers are appended to, e.g. `/dev/nvme0n1p`
    prefix: String,
    pub active_root: u32,
    pub inactive_root: u32,
    pub inactive_kernel: u32,
}

impl PartitionInfo {
    /// Parse the output of `rootdev -s`
    pub fn from_root_device(output: &str) -> Result<Self> {
        let device = output.trim();
        if !device.starts_with("/dev/") {
            bail!("unexpected root device {device:?}");
        }

        let digits = device.len() - device.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            bail!("root device {device:?} has no partition number");
        }
        let (prefix, number) = device.split_at(device.len() - digits);
        let active_root: u32 = number
            .parse()
            .map_err(|_| anyhow!("bad partition number in {device:?}"))?;

        let (inactive_root, inactive_kernel) = match active_root {
            ROOT_A => (ROOT_B, KERNEL_B),
            ROOT_B => (ROOT_A, KERNEL_A),
            other => bail!("root partition {other} is neither slot A nor slot B"),
        };

        // `/dev/mmcblk0p3` and `/dev/nvme0n1p3` separate the number with a `p`
        let disk = match prefix.strip_suffix('p') {
            Some(base) if base.ends_with(|c: char| c.is_ascii_digit()) => base,
            _ => prefix,
        };

        Ok(Self {
            disk: disk.to_string(),
            prefix: prefix.to_string(),
            active_root,
            inactive_root,
            inactive_kernel,
        })
    }

    pub fn partition(&self, number: u32) -> String {
        format!("{}{}", self.prefix, number)
    }

    pub fn inactive_root_device(&self) -> String {
        self.partition(self.inactive_root)
    }

    pub fn inactive_kernel_device(&self) -> String {
        self.partition(self.inactive_kernel)
    }
}
