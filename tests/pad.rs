//! Tests for padding fields to equal shapes.

use anyhow::Result;
use ironbatch::pad::{pad_batch_equal, pad_to_shape};
use ironbatch::*;
use ndarray::{ArrayD, arr1, arr2};

fn values<A: Copy>(a: &ArrayD<A>) -> Vec<A> {
    a.iter().copied().collect()
}

fn pad_pair(short: &[i32], long: &[i32], config: &PadConfig<i32>) -> Result<Vec<i32>> {
    let chunk = vec![vec![arr1(short).into_dyn()], vec![arr1(long).into_dyn()]];
    let fields = combine_pad(chunk, config)?;
    assert_eq!(fields[0].shape(), &[2, long.len()]);
    Ok(values(&fields[0])[..long.len()].to_vec())
}

#[test]
fn test_even_padding_splits_both_sides() -> Result<()> {
    let padded = pad_pair(&[1, 2, 3], &[1, 2, 3, 4, 5], &PadConfig::default())?;
    assert_eq!(padded, vec![0, 1, 2, 3, 0]);
    Ok(())
}

#[test]
fn test_odd_padding_extra_goes_right() -> Result<()> {
    let padded = pad_pair(&[1, 2], &[1, 2, 3, 4, 5], &PadConfig::default())?;
    assert_eq!(padded, vec![0, 1, 2, 0, 0]);
    Ok(())
}

#[test]
fn test_ratio_extremes() -> Result<()> {
    let left = pad_pair(&[7], &[1, 2, 3], &PadConfig::with_value(9).ratio(1.0))?;
    assert_eq!(left, vec![9, 9, 7]);
    let right = pad_pair(&[7], &[1, 2, 3], &PadConfig::with_value(9).ratio(0.0))?;
    assert_eq!(right, vec![7, 9, 9]);
    Ok(())
}

#[test]
fn test_derived_padding_value() -> Result<()> {
    let min = PadValue::derived(|x: &ndarray::ArrayViewD<'_, i32>| {
        x.iter().copied().min().unwrap_or_default()
    });
    let config = PadConfig::default().values([min]);
    let padded = pad_pair(&[5, 3, 4], &[1, 2, 3, 4, 5], &config)?;
    assert_eq!(padded, vec![3, 5, 3, 4, 3]);
    Ok(())
}

#[test]
fn test_per_field_values_and_ratios() -> Result<()> {
    let chunk = vec![
        vec![arr1(&[1]).into_dyn(), arr1(&[1]).into_dyn()],
        vec![arr1(&[1, 1, 1]).into_dyn(), arr1(&[1, 1, 1]).into_dyn()],
    ];
    let config = PadConfig::default()
        .values([PadValue::Constant(-1), PadValue::Constant(8)])
        .ratios([1.0, 0.0]);
    let fields = combine_pad(chunk, &config)?;
    assert_eq!(values(&fields[0])[..3], [-1, -1, 1]);
    assert_eq!(values(&fields[1])[..3], [1, 8, 8]);
    Ok(())
}

#[test]
fn test_two_dimensional_padding() -> Result<()> {
    let x = arr2(&[[1, 2], [3, 4]]).into_dyn();
    let padded = pad_to_shape(&x, &[3, 4], 0, 0.5)?;
    assert_eq!(padded.shape(), &[3, 4]);
    assert_eq!(
        values(&padded),
        vec![0, 1, 2, 0, 0, 3, 4, 0, 0, 0, 0, 0]
    );
    Ok(())
}

#[test]
fn test_batch_equal_uses_elementwise_max() -> Result<()> {
    let batch = vec![
        arr2(&[[1, 1, 1]]).into_dyn(),
        arr2(&[[2], [2]]).into_dyn(),
    ];
    let stacked = pad_batch_equal(&batch, &PadValue::Constant(0), 0.0)?;
    assert_eq!(stacked.shape(), &[2, 2, 3]);
    assert_eq!(
        values(&stacked),
        vec![1, 1, 1, 0, 0, 0, 2, 0, 0, 2, 0, 0]
    );
    Ok(())
}

#[test]
fn test_rank_mismatch_is_a_shape_error() {
    let chunk = vec![
        vec![arr1(&[1, 2]).into_dyn()],
        vec![arr2(&[[1, 2]]).into_dyn()],
    ];
    let result = combine_pad(chunk, &PadConfig::default());
    assert!(matches!(result, Err(PipelineError::Shape(_))));
}

#[test]
fn test_cannot_pad_to_smaller_shape() {
    let x = arr1(&[1, 2, 3]).into_dyn();
    assert!(matches!(
        pad_to_shape(&x, &[2], 0, 0.5),
        Err(PipelineError::Shape(_))
    ));
}

#[test]
fn test_invalid_configs() {
    let chunk = || {
        vec![
            vec![arr1(&[1]).into_dyn(), arr1(&[1]).into_dyn()],
            vec![arr1(&[1, 2]).into_dyn(), arr1(&[1, 2]).into_dyn()],
        ]
    };
    let bad_ratio: PadConfig<i32> = PadConfig::default().ratio(1.5);
    assert!(matches!(
        combine_pad(chunk(), &bad_ratio),
        Err(PipelineError::Config(_))
    ));

    let three_values: PadConfig<i32> = PadConfig::default().values([0.into(), 1.into(), 2.into()]);
    assert!(matches!(
        combine_pad(chunk(), &three_values),
        Err(PipelineError::Config(_))
    ));
}

#[test]
fn test_padding_inside_loader() -> Result<()> {
    let rows = (1..=4).map(|n: usize| vec![ArrayD::from_elem(vec![n], n as f32)]);
    let mut loader = Infinite::builder(rows)
        .batch(2, |chunk: Vec<Vec<ArrayD<f32>>>| {
            Ok(combine_pad(chunk, &PadConfig::default())?)
        })
        .batches_per_epoch(2)
        .build()?;

    let batches = loader.epoch()?.collect::<ironbatch::Result<Vec<_>>>()?;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0][0].shape(), &[2, 2]);
    assert_eq!(values(&batches[0][0]), vec![1.0, 0.0, 2.0, 2.0]);
    assert_eq!(batches[1][0].shape(), &[2, 4]);
    assert_eq!(values(&batches[1][0]), vec![3.0, 3.0, 3.0, 0.0, 4.0, 4.0, 4.0, 4.0]);
    Ok(())
}
