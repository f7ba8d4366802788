//! Incremental, identity-keyed collections.
//!
//! A [`Collection`] holds at most one live value per key. Raw collections are
//! fed by a [`Writer`] (typically from a Kubernetes watch); derived
//! collections are produced by [`derive`]/[`derive_many`], which re-run a pure
//! transform only for the keys whose inputs changed. The transform's
//! [`HandlerContext`] records every value it reads out of *other* collections,
//! so a change to any fetched dependency re-triggers exactly the derived
//! entries that read it.
//!
//! Two properties make this composable without recomputation storms:
//!
//! - A derived value equal (by `PartialEq`) to its predecessor is absorbed:
//!   no event propagates downstream.
//! - [`Collection::has_synced`] only reports true once the collection's own
//!   input and every transitively fetched dependency have completed at least
//!   one full pass; consumers must not act on contents before then.
//!
//! Transforms must be non-blocking and must not fetch cyclically; a transform
//! that reads its own collection (directly or through a cycle) will deadlock
//! and is a programming error, not a recoverable condition.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod collection;
mod derived;
mod index;
mod join;
mod source;
mod trigger;


pub use self::{
    collection::{Collection, Resource},
    derived::{derive, derive_from_nothing, derive_many, HandlerContext},
    index::{Index, IndexKey},
    join::join,
    source::{source, Writer},
    trigger::RecomputeTrigger,
};
