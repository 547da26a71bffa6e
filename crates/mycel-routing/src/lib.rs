//! Adaptive routing for the Mycel mesh.
//!
//! Two pieces: the [`StigmergyRouter`], which learns next-hop preference
//! from transmission outcomes through decaying pheromone trails, and the
//! [`TagPolicy`] ACL, which gates what the router is allowed to learn
//! about in the first place.

pub mod policy;
pub mod router;

pub use policy::{Action, TagPolicy, TagRule, WILDCARD};
pub use router::{
    RoutePheromone, RouterStats, StigmergyRouter, BOOST, DECAY_RATE, DEFAULT_PATH_LIMIT,
    PHEROMONE_MIN, PRUNE_FLOOR,
};
