//! Buffer allocation and host/device data movement for accelerator runtimes.
//!
//! The crate is organized around two abstractions:
//!
//! - [`Memory`](memory::Memory): one allocated region with reference-counted
//!   host-side and device-side address handles, a fixed byte size, and a
//!   directional `sync` operation.
//! - [`DataMover`](mover::DataMover): allocates regions with a placement policy
//!   ([`MemoryType`]) and moves data between the host and device address
//!   spaces, either blocking or asynchronously with a barrier (`sync`) and a
//!   non-blocking status poll (`get_status`).
//!
//! Both are bound to a runtime [`BackendKind`] through the
//! [`Registry`](registry::Registry), which maps a kind to a
//! [`Driver`](driver::Driver) implementation. The `none` kind is always
//! available; the `xrt` kind is an emulated accelerator runtime compiled in with
//! the `xrt` feature.
//!
//! ```
//! use hdx::{BackendKind, DataMover, ExecutionType, MemoryType};
//!
//! let mover = DataMover::create(BackendKind::None).unwrap();
//! let mem = mover.get_buffer(4096, MemoryType::Dual).unwrap();
//! mem.write_host(0, &[1, 2, 3, 4]).unwrap();
//! mover.upload(&mem, 4, ExecutionType::Async).unwrap();
//! mover.sync().unwrap();
//! ```

pub mod address;
pub mod backends;
pub mod completion;
pub mod config;
pub mod driver;
pub mod enums;
pub mod memory;
pub mod mover;
pub mod registry;
pub mod status;

pub use config::{DataMoverConfig, EmulatorConfig};
pub use enums::{BackendKind, ExecutionType, MemoryType, SyncType};
pub use hdx_common::{Result, error::Error, error::ErrorKind};
pub use memory::Memory;
pub use mover::{DataMover, TransferState};
pub use registry::Registry;
pub use status::{DeviceState, DeviceStatus};
