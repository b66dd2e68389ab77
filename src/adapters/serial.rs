//! Serial port configuration: baud/flow/mode knobs carried even though
//! this crate has no termios/DCB backend.
//!
//! The config struct exists so a caller can describe a serial line the
//! same way it describes a TCP connection; actually opening a tty or COM
//! port is out of scope here, so [`SerialLeaf`] reports `NotImpl` for
//! every I/O operation rather than pretending to talk to hardware.

use crate::error::IoErrorKind;
use crate::layer::{Capability, IoOutcome, Layer, LayerState};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FlowControl {
    None,
    Hardware,
    Software,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StopBits {
    One,
    Two,
}

/// Mirrors `m_io_serial.h`'s `M_io_serial_flags_t` baud/data/parity/stop
/// grouping.
#[derive(Clone, Debug)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl SerialConfig {
    pub fn new(device: impl Into<String>, baud: u32) -> SerialConfig {
        SerialConfig {
            device: device.into(),
            baud,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

/// A leaf that carries a [`SerialConfig`] but has no real backing device;
/// every I/O call reports `NotImpl` since there's no concrete platform
/// backend behind it.
pub struct SerialLeaf {
    config: SerialConfig,
}

impl SerialLeaf {
    pub fn new(config: SerialConfig) -> SerialLeaf {
        SerialLeaf { config }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Layer for SerialLeaf {
    fn name(&self) -> &str {
        "serial"
    }

    fn capabilities(&self) -> Capability {
        Capability::empty()
    }

    fn read(&mut self, _buf: &mut [u8]) -> IoOutcome<usize> {
        IoOutcome::Err(IoErrorKind::NotImpl)
    }

    fn write(&mut self, _buf: &[u8]) -> IoOutcome<usize> {
        IoOutcome::Err(IoErrorKind::NotImpl)
    }

    fn state(&self) -> LayerState {
        LayerState::Error
    }
}
