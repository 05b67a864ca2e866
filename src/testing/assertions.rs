//! Assertion functions for testing loader outputs.
//!
//! These compare batches, or the chunks that make them up, with expected
//! results and panic with a detailed message on mismatch.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Assert that a sequence of outputs matches the expected sequence exactly.
///
/// The message names the first position where the two diverge, or says
/// which side ran out early when one is a prefix of the other.
///
/// # Panics
///
/// Panics on the first differing position or on a length difference.
///
/// # Example
///
/// ```
/// use ironbatch::testing::assert_collections_equal;
///
/// let actual = vec![vec![1, 2], vec![3]];
/// assert_collections_equal(&actual, &[vec![1, 2], vec![3]]);
/// ```
pub fn assert_collections_equal<T: Debug + PartialEq>(actual: &[T], expected: &[T]) {
    let diverged = actual.iter().zip(expected).position(|(a, e)| a != e);
    if let Some(i) = diverged {
        panic!(
            "Outputs diverge at position {i}:\n  Expected: {:?}\n  Actual: {:?}\n  Matching prefix: {:?}",
            expected[i],
            actual[i],
            &expected[..i]
        );
    }
    match actual.len().cmp(&expected.len()) {
        Ordering::Less => panic!(
            "Outputs ended after {} of {} items:\n  Missing: {:?}",
            actual.len(),
            expected.len(),
            &expected[actual.len()..]
        ),
        Ordering::Greater => panic!(
            "Outputs ran {} items past the expected {}:\n  Extra: {:?}",
            actual.len() - expected.len(),
            expected.len(),
            &actual[expected.len()..]
        ),
        Ordering::Equal => {}
    }
}

/// Assert that two collections hold the same elements with the same
/// multiplicities, ignoring order.
///
/// Use this for the output of stages with more than one worker.
///
/// # Panics
///
/// Panics if some element occurs a different number of times.
///
/// # Example
///
/// ```
/// use ironbatch::testing::assert_collections_unordered_equal;
///
/// assert_collections_unordered_equal(&[3, 1, 2, 1], &[1, 1, 2, 3]);
/// ```
pub fn assert_collections_unordered_equal<T: Debug + Eq + Hash>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Collection length mismatch:\n  Expected length: {}\n  Actual length: {}\n  Expected: {expected:?}\n  Actual: {actual:?}",
        expected.len(),
        actual.len()
    );

    let mut counts: HashMap<&T, isize> = HashMap::new();
    for e in expected {
        *counts.entry(e).or_default() += 1;
    }
    for a in actual {
        *counts.entry(a).or_default() -= 1;
    }
    let missing: Vec<_> = counts.iter().filter(|(_, n)| **n > 0).map(|(e, _)| e).collect();
    let extra: Vec<_> = counts.iter().filter(|(_, n)| **n < 0).map(|(e, _)| e).collect();

    if !missing.is_empty() || !extra.is_empty() {
        panic!(
            "Collection content mismatch:\n  Missing elements: {missing:?}\n  Extra elements: {extra:?}\n  Expected: {expected:?}\n  Actual: {actual:?}"
        );
    }
}

/// Assert the layout of fixed-size chunks: every chunk but the last holds
/// exactly `k` items and the last holds between 1 and `k`.
///
/// # Panics
///
/// Panics on an empty chunk list or any chunk of the wrong size.
///
/// # Example
///
/// ```
/// use ironbatch::testing::assert_chunk_sizes;
///
/// assert_chunk_sizes(&[vec![1, 2, 3], vec![4, 5, 6], vec![7]], 3);
/// ```
pub fn assert_chunk_sizes<T: Debug>(chunks: &[Vec<T>], k: usize) {
    let Some((last, full)) = chunks.split_last() else {
        panic!("Expected at least one chunk of size {k}, got none");
    };
    for (i, chunk) in full.iter().enumerate() {
        assert_eq!(
            chunk.len(),
            k,
            "Chunk {i} has {} items, expected {k}:\n  Chunk: {chunk:?}",
            chunk.len()
        );
    }
    assert!(
        (1..=k).contains(&last.len()),
        "Last chunk has {} items, expected between 1 and {k}:\n  Chunk: {last:?}",
        last.len()
    );
}

/// Assert that every element in a collection satisfies a predicate.
///
/// # Panics
///
/// Panics if any element fails the predicate.
///
/// # Example
///
/// ```
/// use ironbatch::testing::assert_all;
///
/// let chunks = vec![vec![1], vec![2, 3]];
/// assert_all(&chunks, |c| !c.is_empty());
/// ```
pub fn assert_all<T: Debug>(collection: &[T], predicate: impl Fn(&T) -> bool) {
    for (i, item) in collection.iter().enumerate() {
        assert!(
            predicate(item),
            "Predicate failed for element at index {i}:\n  Element: {item:?}\n  Collection: {collection:?}"
        );
    }
}
