#[cfg(test)]
mod tests {
    use std::fs;

    use bboxkv::errors::ErrorKind;
    use bboxkv::sstable::naming::{key_index_file, metadata_file, spatial_index_file, sstable_file};
    use bboxkv::sstable::sstable_constants::TOMBSTONE_MARKER;
    use bboxkv::sstable::{SSTableMetadata, SSTableReader, SSTableWriter};
    use bboxkv::spatial::{RTreeSpatialIndex, SpatialIndexBuilder};
    use bboxkv::{BoundingBox, Tuple};
    use bboxkv_int_test::test_util::{open_table, point, read_all, table, write_table};
    use tempfile::tempdir;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let t = table("cities");
        let tuples = vec![
            point("berlin", &[13.4, 52.5], 3),
            Tuple::tombstone("lisbon", 4),
            point("paris", &[2.35, 48.85], 1),
            Tuple::new("tokyo", BoundingBox::empty(), b"no location".to_vec(), 2),
        ];
        let index = write_table(dir.path(), &t, 1, &tuples).unwrap();

        assert_eq!(read_all(&index).unwrap(), tuples);
        assert_eq!(index.get("paris").unwrap().unwrap().payload(), b"paris");
        assert!(index.get("lisbon").unwrap().unwrap().is_tombstone());
        assert!(index.get("rome").unwrap().is_none());

        for path in [
            key_index_file(dir.path(), &t, 1),
            spatial_index_file(dir.path(), &t, 1),
            metadata_file(dir.path(), &t, 1),
        ] {
            assert!(path.exists(), "{:?}", path);
        }
    }

    #[test]
    fn test_scan_for_key_outside_the_key_range() {
        let dir = tempdir().unwrap();
        let t = table("range");
        let tuples: Vec<_> = ["b", "d", "f"]
            .iter()
            .enumerate()
            .map(|(i, key)| point(key, &[i as f64], i as u64))
            .collect();
        let index = write_table(dir.path(), &t, 1, &tuples).unwrap();
        let reader = index.reader();

        assert!(reader.scan_for_key("a").unwrap().is_none());
        assert!(reader.scan_for_key("c").unwrap().is_none());
        assert!(reader.scan_for_key("z").unwrap().is_none());
        assert_eq!(reader.scan_for_key("f").unwrap().unwrap().key(), "f");
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let t = table("foreign");
        let path = sstable_file(dir.path(), &t, 1);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"PK\x03\x04 definitely not a table").unwrap();

        let err = SSTableReader::open(&t, &path).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IntegrityError);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let t = table("missing");
        assert!(SSTableReader::open(&t, sstable_file(dir.path(), &t, 1)).is_err());
    }

    #[test]
    fn test_unsorted_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let t = table("unsorted");
        let mut writer = SSTableWriter::new(dir.path(), &t, 1);
        writer.open().unwrap();
        writer.add_record(&point("b", &[0.0], 1)).unwrap();
        assert!(writer.add_record(&point("a", &[0.0], 1)).is_err());
        assert!(writer.add_record(&point("b", &[0.0], 2)).is_err());
        writer.add_record(&point("c", &[0.0], 1)).unwrap();
        writer.close().unwrap();

        let index = open_table(dir.path(), &t, 1).unwrap();
        let keys: Vec<String> = read_all(&index)
            .unwrap()
            .iter()
            .map(|tuple| tuple.key().to_string())
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_value_with_tombstone_marker_is_rejected() {
        let dir = tempdir().unwrap();
        let t = table("marker");
        let mut writer = SSTableWriter::new(dir.path(), &t, 1);
        writer.open().unwrap();
        let lookalike = Tuple::new("k", BoundingBox::empty(), TOMBSTONE_MARKER.to_vec(), 1);
        let err = writer.add_record(&lookalike).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);

        writer.add_record(&Tuple::tombstone("k", 2)).unwrap();
        writer.close().unwrap();
        let tuples = read_all(&open_table(dir.path(), &t, 1).unwrap()).unwrap();
        assert_eq!(tuples, vec![Tuple::tombstone("k", 2)]);
    }

    #[test]
    fn test_aborted_writer_leaves_no_files() {
        let dir = tempdir().unwrap();
        let t = table("aborted");
        let mut writer = SSTableWriter::new(dir.path(), &t, 1);
        writer.open().unwrap();
        writer.add_record(&point("a", &[1.0], 1)).unwrap();
        writer.abort();

        let entries: Vec<_> = fs::read_dir(dir.path().join("aborted"))
            .unwrap()
            .collect();
        assert!(entries.is_empty());
        assert!(SSTableReader::open(&t, sstable_file(dir.path(), &t, 1)).is_err());
    }

    #[test]
    fn test_spatial_index_references_record_offsets() {
        let dir = tempdir().unwrap();
        let t = table("offsets");
        let tuples = vec![
            point("a", &[1.0, 1.0], 1),
            Tuple::tombstone("b", 2),
            point("c", &[5.0, 5.0], 3),
            point("d", &[9.0, 9.0], 4),
        ];
        let index = write_table(dir.path(), &t, 1, &tuples).unwrap();
        let tree = RTreeSpatialIndex::read_from_file(&spatial_index_file(dir.path(), &t, 1)).unwrap();
        assert_eq!(tree.len(), 3);

        let window = BoundingBox::new(&[(4.0, 10.0), (4.0, 10.0)]).unwrap();
        let mut keys: Vec<String> = tree
            .entries_intersecting(&window)
            .iter()
            .map(|entry| index.reader().read_at(entry.reference()).unwrap().key().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["c", "d"]);
    }

    #[test]
    fn test_metadata_summarises_generation() {
        let dir = tempdir().unwrap();
        let t = table("summary");
        write_table(
            dir.path(),
            &t,
            1,
            &[
                point("a", &[0.0, 2.0], 7),
                Tuple::tombstone("b", 11),
                point("c", &[4.0, -2.0], 5),
            ],
        )
        .unwrap();

        let metadata = SSTableMetadata::read_from(&metadata_file(dir.path(), &t, 1)).unwrap();
        assert_eq!(metadata.tuples, 3);
        assert_eq!(metadata.tombstones, 1);
        assert_eq!(metadata.oldest_timestamp, 5);
        assert_eq!(metadata.newest_timestamp, 11);
        assert_eq!(
            metadata.bounding_box,
            BoundingBox::new(&[(0.0, 4.0), (-2.0, 2.0)]).unwrap()
        );
    }
}
