//! Minimal client for the vSphere Web Services (`urn:vim25`) SOAP API: just
//! enough to log in, find a datacenter and tail its event stream.

pub mod client;
pub mod events;
pub mod inventory;
pub mod models;
pub mod soap;

#[cfg(test)]
pub mod test_support;
