//! Ordered delivery of one sync response to subscribers.
//!
//! ## Phases
//!
//! ```text
//! 1. Metadata        device lists, one-time key counts      (concurrent)
//! 2. ToDevice        to-device events                       (sequential)
//! 3. AccountData     global account data                    (sequential)
//! 4. RawResponse     whole-response subscribers             (concurrent)
//! 5. Rooms           presence | join | invite | knock | leave
//!                    concurrent across categories, sequential within one
//! 6. AfterResponse   whole-response subscribers             (concurrent)
//! ```
//!
//! Every phase completes before the next begins. Within a joined room the
//! order is state, timeline, ephemeral, account data; within a left room it
//! is state, timeline, account data. All subscribers matching one event run
//! concurrently and finish before the next event of the same sequence.
//!
//! The first subscriber error aborts the pass and is returned.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::trace;

use mxsync_core::{ClientEvent, Membership, RoomId, SyncResponse};
use mxsync_store::Transaction;

use crate::error::{Result, SyncError};
use crate::subscriber::{
    DispatchContext, EventCategory, Handler, OneTimeKeysUpdate, RoutedEvent, SubscriberRegistry,
    SubscriberResult, Subscribers, SubscriptionId,
};

/// Completed dispatch phases, reported to the caller in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchPhase {
    Metadata,
    ToDevice,
    AccountData,
    RawResponse,
    Rooms,
    AfterResponse,
}

/// Room scope of a run of events.
#[derive(Clone, Copy)]
struct Scope<'a> {
    room_id: &'a RoomId,
    membership: Membership,
}

/// Delivers responses to the subscribers of a [`SubscriberRegistry`].
#[derive(Debug, Default)]
pub struct EventDispatcher {
    registry: SubscriberRegistry,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Deliver one response inside `tx`.
    ///
    /// `on_phase` is called after each phase completes.
    pub async fn dispatch(
        &self,
        response: Arc<SyncResponse>,
        tx: &Transaction,
        on_phase: &(dyn Fn(DispatchPhase) + Send + Sync),
    ) -> Result<()> {
        let subs = self.registry.snapshot();
        let ctx = DispatchContext::new(tx.clone(), Arc::clone(&response));
        let pass = Pass {
            subs: &subs,
            ctx: &ctx,
            response: &response,
            on_phase,
        };
        pass.run().await.map_err(SyncError::Subscriber)
    }
}

/// State of one dispatch pass.
struct Pass<'a> {
    subs: &'a Subscribers,
    ctx: &'a DispatchContext,
    response: &'a Arc<SyncResponse>,
    on_phase: &'a (dyn Fn(DispatchPhase) + Send + Sync),
}

impl Pass<'_> {
    async fn run(&self) -> SubscriberResult {
        self.metadata().await?;
        self.finish(DispatchPhase::Metadata);

        self.sequence(&self.response.to_device.events, EventCategory::ToDevice, None)
            .await?;
        self.finish(DispatchPhase::ToDevice);

        self.sequence(&self.response.account_data.events, EventCategory::GlobalAccountData, None)
            .await?;
        self.finish(DispatchPhase::AccountData);

        self.whole_response(&self.subs.raw_response).await?;
        self.finish(DispatchPhase::RawResponse);

        futures::try_join!(
            self.sequence(&self.response.presence.events, EventCategory::Presence, None),
            self.joined_rooms(),
            self.invited_rooms(),
            self.knocked_rooms(),
            self.left_rooms(),
        )?;
        self.finish(DispatchPhase::Rooms);

        self.whole_response(&self.subs.after_response).await?;
        self.finish(DispatchPhase::AfterResponse);
        Ok(())
    }

    fn finish(&self, phase: DispatchPhase) {
        trace!(?phase, next_batch = %self.response.next_batch, "dispatch phase complete");
        (self.on_phase)(phase);
    }

    async fn metadata(&self) -> SubscriberResult {
        let mut calls = Vec::new();
        if self.response.has_device_list_changes() {
            for (_, handler) in &self.subs.device_lists {
                calls.push(handler(self.response.device_lists.clone(), self.ctx.clone()));
            }
        }
        if let Some(update) = OneTimeKeysUpdate::from_response(self.response) {
            for (_, handler) in &self.subs.one_time_keys {
                calls.push(handler(update.clone(), self.ctx.clone()));
            }
        }
        try_join_all(calls).await?;
        Ok(())
    }

    async fn whole_response(
        &self,
        handlers: &[(SubscriptionId, Handler<Arc<SyncResponse>>)],
    ) -> SubscriberResult {
        try_join_all(
            handlers
                .iter()
                .map(|(_, handler)| handler(Arc::clone(self.response), self.ctx.clone())),
        )
        .await?;
        Ok(())
    }

    async fn joined_rooms(&self) -> SubscriberResult {
        for (room_id, room) in &self.response.rooms.join {
            let scope = Some(Scope {
                room_id,
                membership: Membership::Join,
            });
            self.sequence(&room.state.events, EventCategory::State, scope).await?;
            self.sequence(&room.timeline.events, EventCategory::Timeline, scope)
                .await?;
            self.sequence(&room.ephemeral.events, EventCategory::Ephemeral, scope)
                .await?;
            self.sequence(&room.account_data.events, EventCategory::RoomAccountData, scope)
                .await?;
        }
        Ok(())
    }

    async fn invited_rooms(&self) -> SubscriberResult {
        for (room_id, room) in &self.response.rooms.invite {
            let scope = Some(Scope {
                room_id,
                membership: Membership::Invite,
            });
            self.sequence(&room.invite_state.events, EventCategory::InviteState, scope)
                .await?;
        }
        Ok(())
    }

    async fn knocked_rooms(&self) -> SubscriberResult {
        for (room_id, room) in &self.response.rooms.knock {
            let scope = Some(Scope {
                room_id,
                membership: Membership::Knock,
            });
            self.sequence(&room.knock_state.events, EventCategory::KnockState, scope)
                .await?;
        }
        Ok(())
    }

    async fn left_rooms(&self) -> SubscriberResult {
        for (room_id, room) in &self.response.rooms.leave {
            let scope = Some(Scope {
                room_id,
                membership: Membership::Leave,
            });
            self.sequence(&room.state.events, EventCategory::State, scope).await?;
            self.sequence(&room.timeline.events, EventCategory::Timeline, scope)
                .await?;
            self.sequence(&room.account_data.events, EventCategory::RoomAccountData, scope)
                .await?;
        }
        Ok(())
    }

    async fn sequence(
        &self,
        events: &[ClientEvent],
        category: EventCategory,
        scope: Option<Scope<'_>>,
    ) -> SubscriberResult {
        for event in events {
            self.emit(event, category, scope).await?;
        }
        Ok(())
    }

    async fn emit(
        &self,
        event: &ClientEvent,
        category: EventCategory,
        scope: Option<Scope<'_>>,
    ) -> SubscriberResult {
        let handlers = self.subs.event_handlers(&event.event_type, category);
        if handlers.is_empty() {
            return Ok(());
        }

        let routed = Arc::new(RoutedEvent {
            event: event.clone(),
            category,
            room_id: scope.map(|s| s.room_id.clone()),
            membership: scope.map(|s| s.membership),
        });
        try_join_all(
            handlers
                .into_iter()
                .map(|handler| handler(Arc::clone(&routed), self.ctx.clone())),
        )
        .await?;
        Ok(())
    }
}
