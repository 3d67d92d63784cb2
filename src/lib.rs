// src/lib.rs
//! DVB / MPEG-2 SI section reader.
//!
//! Packets are split per PID, sections are rebuilt by one
//! [`psi::SectionBuilder`] per (PID, table id), multi-part tables are
//! collected by a [`psi::TableTracker`] and descriptor loops are decoded
//! through a [`descriptors::DescriptorRegistry`].

pub mod constants;
pub mod descriptors;
pub mod error;
pub mod feed;
pub mod packet;
pub mod psi;
pub mod reader;
pub mod report;
pub mod service_list;

pub use descriptors::{Descriptor, DescriptorKind, DescriptorRegistry};
pub use error::SiError;
pub use reader::{run, Options};
pub use report::{Reporter, SiReport};
pub use service_list::{Service, ServiceList};
