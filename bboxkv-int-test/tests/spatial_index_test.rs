#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bboxkv::errors::StorageError;
    use bboxkv::spatial::{RTreeSpatialIndex, SpatialError, SpatialIndexBuilder, SpatialIndexEntry};
    use bboxkv::BoundingBox;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    fn grid_tree(max_node_size: usize) -> RTreeSpatialIndex {
        let mut tree = RTreeSpatialIndex::with_max_node_size(max_node_size).unwrap();
        for x in 0..20 {
            for y in 0..10 {
                let reference = (x * 10 + y) as u64;
                let entry = SpatialIndexEntry::new(BoundingBox::point(&[x as f64, y as f64]), reference);
                assert!(tree.insert(entry));
            }
        }
        tree
    }

    #[test]
    fn test_window_query_on_grid() {
        let tree = grid_tree(8);
        assert_eq!(tree.len(), 200);
        assert!(tree.check_integrity().is_valid);

        let window = BoundingBox::new(&[(8.0, 8.0), (3.0, 5.0)]).unwrap();
        let mut references: Vec<u64> = tree
            .entries_intersecting(&window)
            .iter()
            .map(SpatialIndexEntry::reference)
            .collect();
        references.sort_unstable();
        assert_eq!(references, vec![83, 84, 85]);
    }

    #[test]
    fn test_query_matches_linear_scan() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut tree = RTreeSpatialIndex::with_max_node_size(6).unwrap();
        let mut all = Vec::new();
        for reference in 0..1_000u64 {
            let x = rng.gen_range(0.0..1_000.0);
            let y = rng.gen_range(0.0..1_000.0);
            let w = rng.gen_range(0.0..20.0);
            let h = rng.gen_range(0.0..20.0);
            let entry = SpatialIndexEntry::new(
                BoundingBox::new(&[(x, x + w), (y, y + h)]).unwrap(),
                reference,
            );
            all.push(entry.clone());
            tree.insert(entry);
        }
        assert!(tree.check_integrity().is_valid);

        for _ in 0..50 {
            let x = rng.gen_range(0.0..1_000.0);
            let y = rng.gen_range(0.0..1_000.0);
            let window = BoundingBox::new(&[(x, x + 60.0), (y, y + 60.0)]).unwrap();

            let mut found: Vec<u64> = tree
                .entries_intersecting(&window)
                .iter()
                .map(SpatialIndexEntry::reference)
                .collect();
            found.sort_unstable();
            let expected: Vec<u64> = all
                .iter()
                .filter(|entry| entry.bounding_box().intersects(&window))
                .map(SpatialIndexEntry::reference)
                .collect();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn test_persisted_tree_is_byte_identical() {
        let tree = grid_tree(5);
        let mut first = Vec::new();
        tree.write_to(&mut first).unwrap();

        let restored = RTreeSpatialIndex::read_from(&mut Cursor::new(&first)).unwrap();
        assert_eq!(restored.len(), tree.len());
        assert_eq!(restored.stats(), tree.stats());
        assert!(restored.check_integrity().is_valid);

        let mut second = Vec::new();
        restored.write_to(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_roundtrip_keeps_query_results() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.sidx");
        let tree = grid_tree(4);
        tree.write_to_file(&path).unwrap();

        let restored = RTreeSpatialIndex::read_from_file(&path).unwrap();
        let window = BoundingBox::new(&[(0.0, 2.5), (0.0, 1.0)]).unwrap();
        let mut references: Vec<u64> = restored
            .entries_intersecting(&window)
            .iter()
            .map(SpatialIndexEntry::reference)
            .collect();
        references.sort_unstable();
        assert_eq!(references, vec![0, 1, 10, 11, 20, 21]);
    }

    #[test]
    fn test_corrupt_tree_is_rejected() {
        let tree = grid_tree(8);
        let mut bytes = Vec::new();
        tree.write_to(&mut bytes).unwrap();

        bytes[0] ^= 0xff;
        let err = RTreeSpatialIndex::read_from(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, SpatialError::Integrity(_)));

        bytes[0] ^= 0xff;
        bytes.truncate(bytes.len() / 2);
        let err = RTreeSpatialIndex::read_from(&mut Cursor::new(&bytes)).unwrap_err();
        let err: StorageError = err.into();
        assert!(!err.message().is_empty());
    }

    #[test]
    fn test_mixed_dimensions_are_rejected() {
        let mut tree = RTreeSpatialIndex::new();
        assert!(tree.insert(SpatialIndexEntry::new(BoundingBox::point(&[1.0, 1.0]), 1)));
        assert!(!tree.insert(SpatialIndexEntry::new(BoundingBox::point(&[1.0, 1.0, 1.0]), 2)));
        assert!(!tree.insert(SpatialIndexEntry::new(BoundingBox::empty(), 3)));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.dimension(), Some(2));
    }
}
