//! Inline aggregate execution.

/// Decide and evolve in one step: `handle` the command, then `apply` every
/// resulting event to the aggregate in place.
///
/// Persistence and publication are the caller's business; domain tests use
/// this directly, the infra dispatcher wraps it with a conditional write.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockroute_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
