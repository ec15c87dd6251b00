//! Subscribers and how the engine reaches them.
//!
//! A subscriber declares its id, group, run mode, lifecycle hooks and event
//! handlers once, in [`Subscriber::configure`]. The declarations become a
//! [`SubscriberMetadata`] table, cached per type by a
//! [`SubscriberMetadataFactory`]. The engine never sees concrete types: it
//! asks a [`SubscriberAccessorRepository`] for type-erased
//! [`SubscriberAccessor`]s.
//!
//! # Example
//!
//! ```ignore
//! struct ProfileProjection { db: Db }
//!
//! impl Subscriber for ProfileProjection {
//!     fn configure(builder: &mut SubscriberMetadataBuilder<Self>) {
//!         builder
//!             .id("profile_projection")
//!             .group("projections")
//!             .setup(|this| this.db.create_table())
//!             .teardown(|this| this.db.drop_table())
//!             .subscribe::<ProfileCreated, _>(|this, event| {
//!                 this.db.insert(event.aggregate_id(), &event.name)
//!             });
//!     }
//! }
//! ```

mod accessor;
mod metadata;

pub use accessor::{
    BoundHandler, BoundHook, MetadataSubscriberAccessor, MetadataSubscriberAccessorRepository,
    SubscriberAccessor, SubscriberAccessorRepository,
};
pub use metadata::{
    Envelope, HandlerEntry, SubscriberMetadata, SubscriberMetadataBuilder,
    SubscriberMetadataFactory,
};

/// Application code driven by a subscription.
pub trait Subscriber: Sized + Send + Sync + 'static {
    /// Declare id, hooks and handlers.
    fn configure(builder: &mut SubscriberMetadataBuilder<Self>);
}
