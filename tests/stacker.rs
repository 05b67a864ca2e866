//! Tests for batch accumulation.

use anyhow::Result;
use ironbatch::testing::*;
use ironbatch::*;

fn chunks_of(items: Vec<i32>, k: usize) -> Result<Vec<Vec<i32>>> {
    Ok(items.into_iter().stack(BatchSize::Fixed(k))?.collect())
}

#[test]
fn test_fixed_size_with_short_tail() -> Result<()> {
    let chunks = chunks_of((1..=10).collect(), 3)?;
    assert_chunk_sizes(&chunks, 3);
    assert_collections_equal(
        &chunks,
        &[vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9], vec![10]],
    );
    Ok(())
}

#[test]
fn test_fixed_size_exact_multiple() -> Result<()> {
    let chunks = chunks_of((1..=6).collect(), 3)?;
    assert_collections_equal(&chunks, &[vec![1, 2, 3], vec![4, 5, 6]]);
    Ok(())
}

#[test]
fn test_fixed_size_sweep() -> Result<()> {
    for n in 1..=20 {
        for k in 1..=7 {
            let items: Vec<i32> = (0..n).collect();
            let chunks = chunks_of(items.clone(), k)?;
            assert_chunk_sizes(&chunks, k);
            let flat: Vec<i32> = chunks.into_iter().flatten().collect();
            assert_collections_equal(&flat, &items);
        }
    }
    Ok(())
}

#[test]
fn test_empty_input_yields_no_chunks() -> Result<()> {
    let chunks = chunks_of(Vec::new(), 4)?;
    assert!(chunks.is_empty());
    Ok(())
}

#[test]
fn test_zero_batch_size_is_rejected() {
    let result = (0..3).stack(BatchSize::Fixed(0));
    assert!(matches!(result, Err(PipelineError::Config(_))));
}

#[test]
fn test_predicate_never_rejects_first_item() -> Result<()> {
    let never = BatchSize::predicate(|_: &[i32], _: &i32| false);
    let chunks: Vec<Vec<i32>> = vec![1, 2, 3].into_iter().stack(never)?.collect();
    assert_collections_equal(&chunks, &[vec![1], vec![2], vec![3]]);
    Ok(())
}

#[test]
fn test_predicate_by_running_sum() -> Result<()> {
    let up_to_ten = BatchSize::predicate(|chunk: &[i32], x: &i32| chunk.iter().sum::<i32>() + x <= 10);
    let chunks: Vec<Vec<i32>> = vec![4, 5, 3, 9, 1, 12, 2]
        .into_iter()
        .stack(up_to_ten)?
        .collect();
    // 12 exceeds the bound on its own but still opens a chunk
    assert_collections_equal(
        &chunks,
        &[vec![4, 5], vec![3], vec![9, 1], vec![12], vec![2]],
    );
    assert_all(&chunks, |c| !c.is_empty());
    Ok(())
}

#[test]
fn test_stacker_inside_loader() -> Result<()> {
    let mut loader = Infinite::builder(0u32..10)
        .batch(4, |chunk: Vec<u32>| Ok(chunk))
        .batches_per_epoch(10)
        .build()?;

    let batches = loader.epoch()?.collect::<ironbatch::Result<Vec<_>>>()?;
    assert_chunk_sizes(&batches, 4);
    assert_collections_equal(
        &batches,
        &[vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]],
    );
    Ok(())
}

#[test]
fn test_predicate_inside_loader() -> Result<()> {
    let mut loader = Infinite::builder(["a", "bb", "ccc", "d", "ee", "f"].map(String::from))
        .batch_with(
            BatchSize::predicate(|chunk: &[String], s: &String| {
                chunk.iter().map(|c| c.len()).sum::<usize>() + s.len() <= 3
            }),
            |chunk: Vec<String>| Ok(chunk.concat()),
        )
        .batches_per_epoch(10)
        .build()?;

    let batches = loader.epoch()?.collect::<ironbatch::Result<Vec<_>>>()?;
    assert_collections_equal(
        &batches,
        &["abb".to_string(), "ccc".to_string(), "dee".to_string(), "f".to_string()],
    );
    Ok(())
}
