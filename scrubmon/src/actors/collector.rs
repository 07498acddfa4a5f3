use crate::sequence::EventsByPg;
use crate::source::ClusterStateSource;
use crate::stamps::PgId;
use actix::prelude::*;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// An actor implementation of a schedule event collector. It owns the per-PG event logs for one
/// monitoring window, samples the schedule descriptions of the tracked PGs on a fixed interval,
/// and appends every newly observed message in observation order. Stale samples are discarded by
/// the event logs, so only actual schedule transitions accumulate.
///
/// The actor is started fresh for every monitoring window; collected events do not survive it.
pub struct CollectorActor {
    source: Arc<dyn ClusterStateSource + Send + Sync>,
    pgs: Vec<PgId>,
    poll_interval: Duration,
    events: EventsByPg,
}

impl CollectorActor {
    /// Create a new [`CollectorActor`] tracking the given PGs through the given source.
    pub fn new(
        source: Arc<dyn ClusterStateSource + Send + Sync>,
        pgs: Vec<PgId>,
        poll_interval: Duration,
    ) -> CollectorActor {
        Self {
            source,
            pgs,
            poll_interval,
            events: EventsByPg::new(),
        }
    }

    /// Send a [`SampleSchedules`] command to this actor.
    fn sample_schedules(&mut self, ctx: &mut <Self as Actor>::Context) {
        ctx.notify(SampleSchedules);
    }
}

/// Message requesting the actor samples the current schedule descriptions and records the new
/// ones.
#[derive(Debug, Message)]
#[rtype(result = "()")]
struct SampleSchedules;

/// Message requesting the events collected so far, as a snapshot.
#[derive(Debug, Message)]
#[rtype(result = "EventsByPg")]
pub struct CollectEvents;

impl Actor for CollectorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!("schedule collector started for {} PGs", self.pgs.len());

        // the interval only fires after a full period, so take the first sample right away
        self.sample_schedules(ctx);
        ctx.run_interval(self.poll_interval, Self::sample_schedules);
    }
}

impl Handler<SampleSchedules> for CollectorActor {
    // samples must not overlap, a slow sample finishing late would reorder the event logs
    type Result = AtomicResponse<Self, ()>;

    fn handle(&mut self, _: SampleSchedules, _: &mut Self::Context) -> Self::Result {
        let source = self.source.clone();
        let pgs = self.pgs.clone();

        AtomicResponse::new(Box::pin(
            async move { source.scrub_schedules(&pgs).await }
                .into_actor(self)
                .map(|res, actor, _| match res {
                    Ok(schedules) => {
                        for (pg, message) in schedules {
                            let newly_recorded =
                                actor.events.entry(pg.clone()).or_default().record(message);
                            if newly_recorded {
                                debug!("recorded new schedule event for pg {}", pg);
                            }
                        }
                    }
                    // a failed sample is a gap in the observations, not a fatal condition
                    Err(e) => warn!("could not sample scrub schedules: {}", e),
                }),
        ))
    }
}

impl Handler<CollectEvents> for CollectorActor {
    type Result = MessageResult<CollectEvents>;

    fn handle(&mut self, _: CollectEvents, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.events.clone())
    }
}
