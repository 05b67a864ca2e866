//! Tests for pipeline wiring and lifecycle.

use anyhow::{Result, anyhow};
use ironbatch::testing::*;
use ironbatch::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn unbox<T: 'static>(item: Item) -> Result<T> {
    item.downcast::<T>()
        .map(|b| *b)
        .map_err(|_| anyhow!("unexpected item type"))
}

fn drain<T: 'static>(pipeline: &mut Pipeline) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for item in pipeline.by_ref() {
        out.push(unbox::<T>(item?)?);
    }
    Ok(out)
}

#[test]
fn test_pipeline_needs_exactly_one_leading_source() -> Result<()> {
    assert!(matches!(Pipeline::new(Vec::new()), Err(PipelineError::Config(_))));

    let not_source = Stage::threads(StageSpec::default(), |x: u8| Ok(x));
    assert!(matches!(
        Pipeline::new(vec![not_source]),
        Err(PipelineError::Config(_))
    ));

    assert!(matches!(
        Pipeline::new(vec![Stage::source(0..3), Stage::source(0..3)]),
        Err(PipelineError::Config(_))
    ));
    Ok(())
}

#[test]
fn test_stage_spec_validation() {
    assert!(matches!(StageSpec::new(0, 1), Err(PipelineError::Config(_))));
    assert!(matches!(StageSpec::new(1, 0), Err(PipelineError::Config(_))));
    assert!(StageSpec::new(3, 2).is_ok());
}

#[test]
fn test_default_stage_names() -> Result<()> {
    let pipeline = Pipeline::new(vec![
        Stage::source(0u8..3),
        Stage::threads(StageSpec::default(), |x: u8| Ok(x)),
        Stage::threads(StageSpec::default(), |x: u8| Ok(x)).named("identity"),
    ])?;
    let names: Vec<&str> = pipeline.stage_names().collect();
    assert_eq!(names, vec!["source-0", "threads-1", "identity"]);
    Ok(())
}

#[test]
fn test_exit_without_enter_is_a_noop() -> Result<()> {
    let mut pipeline = Pipeline::new(vec![Stage::source(0..3)])?;
    pipeline.exit();
    pipeline.exit();
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.live_workers(), 0);
    Ok(())
}

#[test]
fn test_enter_twice_and_reenter_are_rejected() -> Result<()> {
    let mut pipeline = Pipeline::new(vec![Stage::source(0u64..)])?;
    pipeline.enter()?;
    assert!(matches!(pipeline.enter(), Err(PipelineError::Lifecycle(_))));

    pipeline.exit();
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert!(matches!(pipeline.enter(), Err(PipelineError::Lifecycle(_))));
    Ok(())
}

#[test]
fn test_pull_before_enter_and_after_exit() -> Result<()> {
    let mut pipeline = Pipeline::new(vec![Stage::source(0..3)])?;
    assert!(matches!(pipeline.next_item(), Some(Err(PipelineError::Lifecycle(_)))));
    pipeline.enter()?;
    pipeline.exit();
    assert!(matches!(pipeline.next_item(), Some(Err(PipelineError::Lifecycle(_)))));
    Ok(())
}

#[test]
fn test_iterating_an_inactive_pipeline_ends() -> Result<()> {
    let mut idle = Pipeline::new(vec![Stage::source(0u32..)])?;
    assert!(matches!(idle.next(), Some(Err(PipelineError::Lifecycle(_)))));
    assert!(idle.next().is_none());

    let mut closed = Pipeline::new(vec![Stage::source(0u32..)])?;
    closed.enter()?;
    closed.exit();
    assert_eq!(closed.by_ref().filter_map(|item| item.ok()).count(), 0);
    assert!(closed.next().is_none());

    // Errors from a never-entered pipeline do not block a later enter.
    let mut late = Pipeline::new(vec![Stage::source(0u32..3)])?;
    assert_eq!(late.by_ref().count(), 1);
    late.enter()?;
    assert_eq!(drain::<u32>(&mut late)?, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn test_exit_twice_leaves_no_live_workers() -> Result<()> {
    let mut pipeline = Pipeline::new(vec![
        Stage::source(0u64..),
        Stage::threads(StageSpec::new(3, 2)?, |x: u64| Ok(x + 1)),
    ])?;
    pipeline.enter()?;
    assert_eq!(pipeline.live_workers(), 4);

    pipeline.exit();
    assert_eq!(pipeline.live_workers(), 0);
    assert_eq!(pipeline.state(), PipelineState::Closed);

    pipeline.exit();
    assert_eq!(pipeline.live_workers(), 0);
    assert_eq!(pipeline.state(), PipelineState::Closed);
    Ok(())
}

#[test]
fn test_single_worker_order_matches_reference() -> Result<()> {
    let source: Vec<u32> = (0..200).collect();
    let reference: Vec<u32> = source
        .iter()
        .map(|x| x * 3)
        .filter(|x| x % 2 == 0)
        .flat_map(|x| [x, x + 1])
        .collect();

    let mut pipeline = Pipeline::new(vec![
        Stage::source(source),
        Stage::threads(StageSpec::single(2)?, |x: u32| Ok(x * 3)),
        Stage::sequential(1, |inputs: Inputs<u32>| inputs.filter(|x| x % 2 == 0))?,
        Stage::sequential(3, |inputs: Inputs<u32>| inputs.flat_map(|x| [x, x + 1]))?,
    ])?;
    pipeline.enter()?;
    let out: Vec<u32> = drain(&mut pipeline)?;
    assert_collections_equal(&out, &reference);
    assert!(pipeline.is_active());
    assert!(pipeline.next_item().is_none());
    pipeline.exit();
    Ok(())
}

#[test]
fn test_thread_pool_processes_every_item() -> Result<()> {
    let mut pipeline = Pipeline::new(vec![
        Stage::source(0i64..500),
        Stage::threads(StageSpec::new(4, 8)?, |x: i64| Ok(x * x)),
        Stage::threads(StageSpec::new(3, 4)?, |x: i64| Ok(-x)),
    ])?;
    pipeline.enter()?;
    let out: Vec<i64> = drain(&mut pipeline)?;
    let expected: Vec<i64> = (0i64..500).map(|x| -(x * x)).collect();
    assert_collections_unordered_equal(&out, &expected);
    Ok(())
}

#[test]
fn test_backpressure_bounds_items_in_flight() -> Result<()> {
    let source = CountingSource::naturals();
    let drawn = source.counter();
    let mut pipeline = Pipeline::new(vec![
        Stage::source(source),
        Stage::threads(StageSpec::single(1)?, |x: u64| Ok(x)),
    ])?;
    pipeline.enter()?;
    let first = pipeline.next_item().ok_or_else(|| anyhow!("no item"))??;
    assert_eq!(unbox::<u64>(first)?, 0);

    thread::sleep(Duration::from_millis(100));
    // Two one-slot buffers plus one item held by each worker.
    assert!(drawn.get() <= 5, "drew {} items", drawn.get());
    pipeline.exit();
    Ok(())
}

#[test]
fn test_drop_joins_workers() -> Result<()> {
    let token = Arc::new(());
    let held = Arc::clone(&token);
    let mut pipeline = Pipeline::new(vec![
        Stage::source(0u64..),
        Stage::threads(StageSpec::new(2, 1)?, move |x: u64| {
            let _ = &held;
            Ok(x)
        }),
    ])?;
    pipeline.enter()?;
    assert!(pipeline.next_item().is_some());
    drop(pipeline);
    assert_eq!(Arc::strong_count(&token), 1);
    Ok(())
}

#[test]
fn test_stats_after_exit() -> Result<()> {
    let mut pipeline = Pipeline::new(vec![
        Stage::source(0u32..10),
        Stage::threads(StageSpec::default(), |x: u32| Ok(x * 2)).named("double"),
    ])?;
    pipeline.enter()?;
    let out: Vec<u32> = drain(&mut pipeline)?;
    assert_eq!(out.len(), 10);
    pipeline.exit();

    let stats = pipeline.stats();
    assert_eq!(stats.state, "closed");
    assert_eq!(stats.live_workers, 0);
    let double = stats.stage("double").ok_or_else(|| anyhow!("missing stage"))?;
    assert_eq!(double.kind, "threads");
    assert_eq!(double.received, 10);
    assert_eq!(double.emitted, 10);
    assert_eq!(double.failures, 0);

    let json = stats.to_json();
    assert_eq!(json["stages"][0]["emitted"], 10);
    Ok(())
}
