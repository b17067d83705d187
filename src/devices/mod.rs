pub mod device;
pub mod device_table;
pub mod geometry;
pub mod interrupt;
pub mod iorb;

pub use device::{Admission, Device, DeviceSnapshot, DiskHardware};
pub use device_table::DeviceTable;
pub use interrupt::{interrupt_vector, DiskInterruptHandler, InterruptEvent, InterruptLine, InterruptVector};
pub use iorb::{IoFuture, IoType, Iorb};
