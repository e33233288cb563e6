use std::io;

use evdev::{
    AttributeSet, BusType, InputEvent, InputId, KeyCode, UinputAbsSetup, uinput::VirtualDevice,
};

use crate::mapping::MappingTable;

pub const VIRTUAL_DEVICE_NAME: &str = "SCUF Envision Pro V2 (Xbox Mode)";
// Xbox Elite 2 identity, so games pick an Xbox layout
const VIRTUAL_VENDOR: u16 = 0x045e;
const VIRTUAL_PRODUCT: u16 = 0x0b13;
const VIRTUAL_VERSION: u16 = 0x0001;

/// Everything the virtual device has to declare up front.
pub struct CapabilitySet {
    keys: AttributeSet<KeyCode>,
    axes: Vec<UinputAbsSetup>,
}

impl CapabilitySet {
    pub fn keys(&self) -> &AttributeSet<KeyCode> {
        &self.keys
    }

    pub fn axes(&self) -> &[UinputAbsSetup] {
        &self.axes
    }
}

impl From<&MappingTable> for CapabilitySet {
    fn from(table: &MappingTable) -> Self {
        let keys = AttributeSet::from_iter(table.destination_buttons());
        let mut axes: Vec<_> = table
            .axes()
            .map(|m| UinputAbsSetup::new(m.destination, m.abs_info()))
            .collect();
        axes.sort_by_key(|a| a.code());
        Self { keys, axes }
    }
}

/// Receiver of canonical events.
///
/// Events are collected by `emit` and become visible to consumers only on
/// `flush`, which terminates them with a frame boundary.
pub trait GamepadSink {
    fn emit(&mut self, event: InputEvent);

    fn flush(&mut self) -> io::Result<()>;

    fn destroy(self);
}

/// A uinput gamepad presenting itself as an Xbox controller.
pub struct VirtualGamepad {
    device: VirtualDevice,
    pending: Vec<InputEvent>,
}

impl VirtualGamepad {
    pub fn create(capabilities: &CapabilitySet) -> io::Result<Self> {
        let input_id = InputId::new(
            BusType::BUS_USB,
            VIRTUAL_VENDOR,
            VIRTUAL_PRODUCT,
            VIRTUAL_VERSION,
        );

        let mut device_builder = VirtualDevice::builder()?
            .name(VIRTUAL_DEVICE_NAME)
            .input_id(input_id)
            .with_keys(capabilities.keys())?;

        for setup in capabilities.axes() {
            device_builder = device_builder.with_absolute_axis(setup)?;
        }

        let mut device = device_builder.build()?;
        match device.get_syspath() {
            Ok(path) => tracing::info!("Created virtual gamepad: {}", path.display()),
            Err(e) => tracing::warn!("Created virtual gamepad, but its syspath is unknown: {e}"),
        }

        Ok(Self {
            device,
            pending: Vec::with_capacity(16),
        })
    }
}

impl GamepadSink for VirtualGamepad {
    fn emit(&mut self, event: InputEvent) {
        self.pending.push(event);
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        // VirtualDevice::emit terminates the batch with SYN_REPORT
        let result = self.device.emit(&self.pending);
        self.pending.clear();
        result
    }

    fn destroy(self) {
        tracing::info!("Destroying virtual gamepad");
        drop(self.device);
    }
}
