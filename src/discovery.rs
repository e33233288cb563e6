use std::{
    collections::{HashMap, HashSet},
    io,
    path::PathBuf,
};

use evdev::{AbsInfo, AbsoluteAxisCode, Device, KeyCode};
use thiserror::Error;
use udev::{Device as UdevDevice, Enumerator};

use crate::{
    gamepad::VIRTUAL_DEVICE_NAME,
    mapping::{AxisRange, MappingTable},
};

/// What a node must report to be taken for the gamepad interface
const BASELINE_KEYS: [KeyCode; 2] = [KeyCode::BTN_SOUTH, KeyCode::BTN_EAST];
const BASELINE_AXES: [AbsoluteAxisCode; 2] = [AbsoluteAxisCode::ABS_X, AbsoluteAxisCode::ABS_Y];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no matching controller found")]
    NotFound,
    #[error("more than one node looks like the gamepad interface: {0:?}")]
    AmbiguousMatch(Vec<PathBuf>),
    #[error("failed to enumerate input devices: {0}")]
    Enumeration(#[from] io::Error),
}

/// Vendor id and the product ids of every supported hardware variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub vendor: u16,
    pub products: Vec<u16>,
}

impl DeviceTarget {
    pub fn matches(&self, vendor: u16, product: u16) -> bool {
        vendor == self.vendor && self.products.contains(&product)
    }
}

/// Calibration the node reports for one absolute axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportedAxis {
    pub range: AxisRange,
    pub fuzz: i32,
    pub flat: i32,
}

impl From<AbsInfo> for ReportedAxis {
    fn from(info: AbsInfo) -> Self {
        Self {
            range: AxisRange::new(info.minimum(), info.maximum()),
            fuzz: info.fuzz(),
            flat: info.flat(),
        }
    }
}

/// A mapped source axis whose reported range is not the one the table scales from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeMismatch {
    pub axis: AbsoluteAxisCode,
    pub expected: AxisRange,
    pub reported: AxisRange,
}

/// An event node of the target product, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub keys: HashSet<KeyCode>,
    pub axes: HashMap<AbsoluteAxisCode, ReportedAxis>,
}

impl DeviceCandidate {
    fn from_device(path: PathBuf, device: &Device) -> Self {
        Self {
            path,
            name: device.name().unwrap_or_default().to_string(),
            vendor: device.input_id().vendor(),
            product: device.input_id().product(),
            keys: device
                .supported_keys()
                .map(|keys| keys.iter().collect())
                .unwrap_or_default(),
            axes: device
                .get_absinfo()
                .map(|infos| infos.map(|(code, info)| (code, info.into())).collect())
                .unwrap_or_default(),
        }
    }

    pub fn is_primary_gamepad(&self) -> bool {
        BASELINE_KEYS.iter().all(|k| self.keys.contains(k))
            && BASELINE_AXES.iter().all(|a| self.axes.contains_key(a))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub path: PathBuf,
    pub name: String,
    /// Other interfaces of the same product, e.g. consumer control
    pub auxiliary: Vec<PathBuf>,
    pub axes: HashMap<AbsoluteAxisCode, ReportedAxis>,
}

impl DiscoveredDevice {
    /// Mapped source axes the node reports with another range than the table expects.
    pub fn range_mismatches(&self, table: &MappingTable) -> Vec<RangeMismatch> {
        let mut mismatches: Vec<_> = table
            .axes()
            .filter_map(|mapping| {
                let reported = self.axes.get(&mapping.source)?.range;
                (reported != mapping.source_range).then_some(RangeMismatch {
                    axis: mapping.source,
                    expected: mapping.source_range,
                    reported,
                })
            })
            .collect();
        mismatches.sort_by_key(|m| m.axis.0);
        mismatches
    }
}

/// Pick the gamepad interface among the nodes of the target product.
///
/// Nodes are considered in path order. More than one node passing the
/// capability check is an error rather than a guess.
pub fn select_primary(
    target: &DeviceTarget,
    candidates: Vec<DeviceCandidate>,
) -> Result<DiscoveredDevice, DiscoveryError> {
    let mut candidates: Vec<_> = candidates
        .into_iter()
        .filter(|c| c.name != VIRTUAL_DEVICE_NAME && target.matches(c.vendor, c.product))
        .collect();
    candidates.sort_by(|a, b| a.path.cmp(&b.path));

    let (mut primary, auxiliary): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|c| c.is_primary_gamepad());

    match primary.len() {
        0 => Err(DiscoveryError::NotFound),
        1 => {
            let primary = primary.remove(0);
            Ok(DiscoveredDevice {
                path: primary.path,
                name: primary.name,
                auxiliary: auxiliary.into_iter().map(|c| c.path).collect(),
                axes: primary.axes,
            })
        }
        _ => Err(DiscoveryError::AmbiguousMatch(
            primary.into_iter().map(|c| c.path).collect(),
        )),
    }
}

/// Source of candidate nodes.
pub trait DeviceScanner {
    fn scan(&self, target: &DeviceTarget) -> io::Result<Vec<DeviceCandidate>>;
}

/// Enumerates `/dev/input/event*` nodes through udev.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdevScanner;

impl UdevScanner {
    fn property_value(udev_device: &UdevDevice, name: &str) -> Option<String> {
        udev_device
            .property_value(name)
            .map(|s| s.to_string_lossy().trim_matches('\"').to_string())
    }

    fn hex_property(udev_device: &UdevDevice, name: &str) -> Option<u16> {
        Self::property_value(udev_device, name).and_then(|v| u16::from_str_radix(&v, 16).ok())
    }
}

impl DeviceScanner for UdevScanner {
    fn scan(&self, target: &DeviceTarget) -> io::Result<Vec<DeviceCandidate>> {
        let mut enumerator = Enumerator::new()?;
        enumerator.match_subsystem("input")?;

        let mut candidates = Vec::new();
        for udev_device in enumerator.scan_devices()? {
            let Some(devnode) = udev_device.devnode() else {
                continue;
            };
            if !devnode.to_string_lossy().starts_with("/dev/input/event") {
                continue;
            }
            let vendor = Self::hex_property(&udev_device, "ID_VENDOR_ID");
            let product = Self::hex_property(&udev_device, "ID_MODEL_ID");
            if !matches!((vendor, product), (Some(v), Some(p)) if target.matches(v, p)) {
                continue;
            }

            match Device::open(devnode) {
                Ok(device) => {
                    let candidate = DeviceCandidate::from_device(devnode.to_path_buf(), &device);
                    tracing::debug!(
                        "Found node {:?} name={:?} gamepad={}",
                        candidate.path,
                        candidate.name,
                        candidate.is_primary_gamepad()
                    );
                    candidates.push(candidate);
                }
                Err(e) => tracing::warn!("Cannot inspect {devnode:?}, skipping it: {e}"),
            }
        }
        Ok(candidates)
    }
}

pub struct Discovery<S = UdevScanner> {
    target: DeviceTarget,
    scanner: S,
}

impl<S: DeviceScanner> Discovery<S> {
    pub fn new(target: DeviceTarget, scanner: S) -> Self {
        Self { target, scanner }
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub fn discover(&self) -> Result<DiscoveredDevice, DiscoveryError> {
        let candidates = self.scanner.scan(&self.target)?;
        select_primary(&self.target, candidates)
    }
}
