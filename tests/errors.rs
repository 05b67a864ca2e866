//! Tests for failure propagation.

use anyhow::{Result, anyhow, bail};
use ironbatch::*;

/// Pull until the first error; returns the batches before it and the error.
fn until_error<B: Send + 'static>(loader: &mut Infinite<B>) -> Result<(usize, PipelineError)> {
    let mut ok = 0;
    for _ in 0..100 {
        for batch in loader.epoch()? {
            match batch {
                Ok(_) => ok += 1,
                Err(e) => return Ok((ok, e)),
            }
        }
    }
    bail!("no error after {ok} batches")
}

fn assert_torn_down<B: Send + 'static>(loader: &mut Infinite<B>) {
    assert!(!loader.is_active());
    let stats = loader.stats();
    assert_eq!(stats.state, "closed");
    assert_eq!(stats.live_workers, 0);
    assert!(matches!(loader.epoch(), Err(PipelineError::Lifecycle(_))));
}

#[test]
fn test_transform_error_is_reported_once() -> Result<()> {
    let mut loader = Infinite::builder(0u32..)
        .map(|x: u32| if x == 5 { Err(anyhow!("bad item {x}")) } else { Ok(x) })
        .named("validate")
        .batch(1, |chunk: Vec<u32>| Ok(chunk[0]))
        .batches_per_epoch(3)
        .build()?;

    let (ok, err) = until_error(&mut loader)?;
    assert!(ok <= 5);
    assert!(err.is_worker_failure());
    match err {
        PipelineError::Transform { stage, source } => {
            assert_eq!(stage, "validate");
            assert!(source.to_string().contains("bad item 5"));
        }
        other => bail!("unexpected error: {other}"),
    }
    assert_torn_down(&mut loader);
    Ok(())
}

#[test]
fn test_epoch_stops_after_error() -> Result<()> {
    let mut loader = Infinite::builder(0u32..)
        .map(|x: u32| if x == 0 { Err(anyhow!("first item")) } else { Ok(x) })
        .batch(1, |chunk: Vec<u32>| Ok(chunk))
        .batches_per_epoch(10)
        .build()?;

    let results: Vec<_> = loader.epoch()?.collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(PipelineError::Transform { .. })));
    assert_torn_down(&mut loader);
    Ok(())
}

#[test]
fn test_panic_is_captured() -> Result<()> {
    let mut loader = Infinite::builder(0u32..)
        .map(|x: u32| {
            if x == 3 {
                panic!("boom at {x}");
            }
            Ok(x)
        })
        .batch(2, |chunk: Vec<u32>| Ok(chunk))
        .batches_per_epoch(4)
        .build()?;

    let (_, err) = until_error(&mut loader)?;
    match err {
        PipelineError::Panicked { message, .. } => assert!(message.contains("boom at 3")),
        other => bail!("unexpected error: {other}"),
    }
    assert_torn_down(&mut loader);
    Ok(())
}

#[test]
fn test_failure_on_last_item_of_finite_source() -> Result<()> {
    let mut loader = Infinite::builder(0u32..3)
        .map(|x: u32| if x == 2 { Err(anyhow!("last")) } else { Ok(x) })
        .batch(10, |chunk: Vec<u32>| Ok(chunk))
        .batches_per_epoch(1)
        .build()?;

    let results: Vec<_> = loader.epoch()?.collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(PipelineError::Transform { .. })));
    assert_torn_down(&mut loader);
    Ok(())
}

#[test]
fn test_shape_error_in_combiner_keeps_its_kind() -> Result<()> {
    let rows = vec![vec![1, 2], vec![3, 4], vec![5], vec![6, 7]];
    let mut loader = Infinite::builder(rows)
        .batch(2, |chunk: Vec<Vec<i32>>| Ok(combine_rows(chunk)?))
        .batches_per_epoch(2)
        .build()?;

    let results: Vec<_> = loader.epoch()?.collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(PipelineError::Shape(_))));
    assert_torn_down(&mut loader);
    Ok(())
}

#[test]
fn test_generator_error() -> Result<()> {
    let mut loader = Infinite::builder(0u8..)
        .try_sequential(|inputs: Inputs<u8>| {
            inputs.map(|x| {
                if x < 4 {
                    Ok(x)
                } else {
                    Err(anyhow!("generator gave up at {x}"))
                }
            })
        })
        .batch(2, |chunk: Vec<u8>| Ok(chunk))
        .batches_per_epoch(5)
        .build()?;

    let (ok, err) = until_error(&mut loader)?;
    assert!(ok <= 2);
    assert!(matches!(err, PipelineError::Transform { .. }));
    assert!(err.to_string().contains("generator gave up at 4"));
    assert_torn_down(&mut loader);
    Ok(())
}

#[test]
fn test_error_in_one_of_many_workers() -> Result<()> {
    let mut loader = Infinite::builder(0u64..)
        .threads(StageSpec::new(4, 4)?, |x: u64| {
            if x == 97 {
                bail!("worker refused {x}");
            }
            Ok(x)
        })
        .batch(8, |chunk: Vec<u64>| Ok(chunk))
        .batches_per_epoch(50)
        .build()?;

    let (_, err) = until_error(&mut loader)?;
    assert!(err.is_worker_failure());
    assert!(!err.is_cross_process());
    assert_torn_down(&mut loader);
    Ok(())
}

#[test]
fn test_drop_while_running_does_not_hang() -> Result<()> {
    let mut loader = Infinite::builder(0u64..)
        .threads(StageSpec::new(2, 2)?, |x: u64| Ok(x))
        .batch(4, |chunk: Vec<u64>| Ok(chunk))
        .batches_per_epoch(1)
        .build()?;
    assert_eq!(loader.epoch()?.count(), 1);
    drop(loader);
    Ok(())
}

#[test]
fn test_mismatched_item_type_names_the_stage() -> Result<()> {
    let mut pipeline = Pipeline::new(vec![
        Stage::source(0u8..),
        Stage::threads(StageSpec::default(), |x: u32| Ok(x + 1)).named("widen"),
    ])?;
    pipeline.enter()?;
    let err = match pipeline.next_item() {
        Some(Err(e)) => e,
        Some(Ok(_)) => bail!("a u8 was accepted as a u32"),
        None => bail!("no output"),
    };
    match &err {
        PipelineError::TypeMismatch { stage, expected } => {
            assert_eq!(stage, "widen");
            assert_eq!(*expected, "u32");
        }
        other => bail!("unexpected error: {other}"),
    }
    assert!(err.is_worker_failure());
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert_eq!(pipeline.live_workers(), 0);
    Ok(())
}
