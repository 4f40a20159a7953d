//! OBIS-addressed runtime reconfiguration options for a serial LMN port
//! (spec §4.12: "reconfigurable at runtime by OBIS-addressed option
//! codes: baud, databits, parity, stop-bits, flow-control").

use smf_proto::Obis;
use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

/// OBIS code addressing the baud-rate option.
pub const OBIS_BAUD: Obis = Obis::new([0x00, 0x00, 0x61, 0x61, 0x00, 0xFF]);
/// OBIS code addressing the data-bits option.
pub const OBIS_DATABITS: Obis = Obis::new([0x00, 0x00, 0x61, 0x62, 0x00, 0xFF]);
/// OBIS code addressing the parity option.
pub const OBIS_PARITY: Obis = Obis::new([0x00, 0x00, 0x61, 0x63, 0x00, 0xFF]);
/// OBIS code addressing the stop-bits option.
pub const OBIS_STOPBITS: Obis = Obis::new([0x00, 0x00, 0x61, 0x64, 0x00, 0xFF]);
/// OBIS code addressing the flow-control option.
pub const OBIS_FLOWCONTROL: Obis = Obis::new([0x00, 0x00, 0x61, 0x65, 0x00, 0xFF]);

/// One runtime-settable serial-line parameter, addressed by its OBIS
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOption {
    /// New baud rate in bits per second.
    Baud(u32),
    /// New data-bits setting.
    DataBits(DataBits),
    /// New parity setting.
    Parity(Parity),
    /// New stop-bits setting.
    StopBits(StopBits),
    /// New flow-control setting.
    FlowControl(FlowControl),
}

impl PortOption {
    /// The OBIS code this option is addressed by.
    #[must_use]
    pub const fn obis(self) -> Obis {
        match self {
            Self::Baud(_) => OBIS_BAUD,
            Self::DataBits(_) => OBIS_DATABITS,
            Self::Parity(_) => OBIS_PARITY,
            Self::StopBits(_) => OBIS_STOPBITS,
            Self::FlowControl(_) => OBIS_FLOWCONTROL,
        }
    }
}

/// The full set of serial-line parameters `LmnPort` opens with, and the
/// target of every runtime `PortOption` update (spec §4.12).
///
/// A `*Config` struct with a `Default`, in the teacher's style of
/// exposing tunables without file-based config loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Baud rate in bits per second.
    pub baud: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Parity checking mode.
    pub parity: Parity,
    /// Number of stop bits.
    pub stop_bits: StopBits,
    /// Flow-control mode.
    pub flow_control: FlowControl,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl PortConfig {
    /// Applies a single runtime option to this configuration.
    pub fn apply(&mut self, option: PortOption) {
        match option {
            PortOption::Baud(baud) => self.baud = baud,
            PortOption::DataBits(bits) => self.data_bits = bits,
            PortOption::Parity(parity) => self.parity = parity,
            PortOption::StopBits(bits) => self.stop_bits = bits,
            PortOption::FlowControl(flow) => self.flow_control = flow,
        }
    }
}
