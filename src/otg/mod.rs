//! UAC2 USB gadget lifecycle
//!
//! Architecture:
//! ```text
//! GadgetManager (enable/disable, single mutation mutex)
//!     ├── UdcControl      (soft/hard unbind, bind with retry, vendor quirks)
//!     ├── PolicyInjector  (KernelSU → Magisk → SuperSU)
//!     ├── UsbHalGuard     (stop/restart vendor USB HAL)
//!     └── configfs        (paths and command batches)
//! ```
//!
//! Every filesystem and property access runs through the privileged shell.

pub mod card;
pub mod configfs;
pub mod identity;
pub mod log;
pub mod manager;
pub mod policy;
pub mod quirks;
pub mod udc;

pub use card::{parse_gadget_card, GADGET_CARD_NAME};
pub use configfs::GadgetPaths;
pub use identity::{GadgetIdentity, OriginalIdentity};
pub use log::GadgetLog;
pub use manager::{EnableReport, GadgetManager, GadgetStatus};
pub use policy::{PolicyBackend, PolicyInjector, SELINUX_RULES};
pub use quirks::{MtkDeviceMode, UsbHalGuard, VendorQuirk};
pub use udc::{GadgetTiming, UdcControl};
