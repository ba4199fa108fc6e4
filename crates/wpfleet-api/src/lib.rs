// wpfleet-api: async client and wire schema for the `/api/sites` contract.
//
// The same schema types are used by `wpfleet-server` to produce responses,
// so the two sides of the HTTP boundary cannot drift apart.

pub mod client;
pub mod error;
pub mod models;
mod sites;
pub mod transport;

pub use client::SitesClient;
pub use error::Error;
pub use models::{
    ApiSite, CommandAck, CreateSiteRequest, ErrorBody, SiteBody, SiteChanges, SiteEnvelope,
    SiteList,
};
pub use transport::TransportConfig;
