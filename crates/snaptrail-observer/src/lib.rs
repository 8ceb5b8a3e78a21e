pub mod events;
pub mod filter;
pub mod link;
pub mod observer;
pub mod surface;

pub use link::{CoordinatorLink, LinkError};
pub use observer::{ObserverConfig, PageObserver};
pub use surface::{PageSurface, Tone};
