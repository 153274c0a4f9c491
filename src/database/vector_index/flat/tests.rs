use super::*;

fn index_with(vectors: &[[f32; 2]]) -> FlatIndex {
    let mut index = FlatIndex::new(2).expect("non-zero dimension");
    for vector in vectors {
        index.add(vector).expect("matching dimension");
    }
    index
}

#[test]
fn slots_follow_insertion_order() {
    let mut index = FlatIndex::new(2).expect("non-zero dimension");
    assert_eq!(index.add(&[0.0, 0.0]), Ok(0));
    assert_eq!(index.add(&[1.0, 1.0]), Ok(1));
    assert_eq!(index.len(), 2);
    assert_eq!(index.vector(1), Some([1.0, 1.0].as_slice()));
    assert_eq!(index.vector(2), None);
}

#[test]
fn rejects_wrong_dimensions() {
    let mut index = FlatIndex::new(3).expect("non-zero dimension");
    assert_eq!(
        index.add(&[1.0, 2.0]),
        Err(FlatIndexError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    );
    assert!(index.search(&[0.0; 4], 1).is_err());
    assert_eq!(FlatIndex::new(0), Err(FlatIndexError::ZeroDimension));
}

#[test]
fn search_orders_by_ascending_distance() {
    let index = index_with(&[[5.0, 5.0], [1.0, 0.0], [0.0, 0.0], [3.0, 4.0]]);

    let neighbors = index.search(&[0.0, 0.0], 3).expect("search");
    let slots: Vec<usize> = neighbors.iter().map(|n| n.slot).collect();
    assert_eq!(slots, [2, 1, 3]);
    assert_eq!(neighbors[0].distance, 0.0);
    assert_eq!(neighbors[1].distance, 1.0);
    assert_eq!(neighbors[2].distance, 25.0);
}

#[test]
fn search_caps_k_at_index_size() {
    let index = index_with(&[[0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
    assert_eq!(index.search(&[0.0, 0.0], 5).expect("search").len(), 3);
    assert!(index.search(&[0.0, 0.0], 0).expect("search").is_empty());

    let empty = FlatIndex::new(2).expect("non-zero dimension");
    assert!(empty.search(&[0.0, 0.0], 5).expect("search").is_empty());
}

#[test]
fn ties_resolve_to_lower_slot() {
    let index = index_with(&[[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]]);
    let neighbors = index.search(&[0.0, 0.0], 2).expect("search");
    let slots: Vec<usize> = neighbors.iter().map(|n| n.slot).collect();
    assert_eq!(slots, [0, 1]);
}

#[test]
fn from_values_checks_shape() {
    let index = FlatIndex::from_values(2, vec![0.0, 1.0, 2.0, 3.0]).expect("valid shape");
    assert_eq!(index.len(), 2);
    assert_eq!(
        FlatIndex::from_values(2, vec![0.0, 1.0, 2.0]),
        Err(FlatIndexError::Truncated {
            len: 3,
            dimension: 2
        })
    );
}

#[test]
fn similarity_is_bounded_and_decreasing() {
    assert_eq!(similarity(0.0), 1.0);
    let distances = [0.0_f32, 0.1, 0.5, 1.0, 4.0, 100.0];
    for pair in distances.windows(2) {
        let (near, far) = (similarity(pair[0]), similarity(pair[1]));
        assert!(near > far);
        assert!(far > 0.0 && far <= 1.0);
    }
}
