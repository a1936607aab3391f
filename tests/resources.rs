//! # Resource Integration Tests
//!
//! Database-level primitives against a database with a resource directory:
//! documents, binary and value resources, renames, deletes and `put`.

use tempfile::tempdir;
use xupdb::store::serialize;
use xupdb::{
    BlobStore, Database, Fragment, NodeStore, NodeUpdate, ResourceType, ResourceUpdate, UpdateError,
};

fn create_test_db() -> (Database, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db = Database::builder().path(dir.path().join("db")).open().unwrap();
    (db, dir)
}

fn update_error(err: &eyre::Report) -> &UpdateError {
    err.downcast_ref::<UpdateError>().unwrap()
}

fn paths(db: &Database) -> Vec<(usize, String)> {
    db.docs().iter().map(|(pre, path)| (pre, path.to_string())).collect()
}

mod document_tests {
    use super::*;

    fn two_documents() -> (Database, tempfile::TempDir) {
        let (mut db, dir) = create_test_db();
        db.create_document("doc0", vec![Fragment::element("a").with_child(Fragment::element("b"))])
            .unwrap();
        db.create_document("doc1", vec![Fragment::element("c")]).unwrap();
        assert_eq!(paths(&db), vec![(0, "doc0".to_string()), (3, "doc1".to_string())]);
        (db, dir)
    }

    #[test]
    fn delete_resource_and_rename_in_one_snapshot() {
        let (mut db, _dir) = two_documents();

        db.update(|pul| {
            pul.add(ResourceUpdate::delete("doc0"))?;
            pul.add(ResourceUpdate::rename("doc1", "doc2"))
        })
        .unwrap();

        assert_eq!(paths(&db), vec![(0, "doc2".to_string())]);
        assert_eq!(db.store().len(), 2);
        assert_eq!(serialize(db.store(), 0), "<c/>");
    }

    #[test]
    fn node_delete_of_a_document_and_rename() {
        let (mut db, _dir) = two_documents();

        db.update(|pul| {
            pul.add(NodeUpdate::delete(0))?;
            pul.add(ResourceUpdate::rename("doc1", "doc2"))
        })
        .unwrap();

        assert_eq!(paths(&db), vec![(0, "doc2".to_string())]);
        db.store().verify().unwrap();
    }

    #[test]
    fn add_rejects_an_existing_path() {
        let (mut db, _dir) = two_documents();

        let err = db
            .update(|pul| pul.add(ResourceUpdate::add("/doc1", vec![Fragment::element("x")])))
            .unwrap_err();

        assert!(update_error(&err).is_validation());
        assert_eq!(db.docs().len(), 2);
    }

    #[test]
    fn add_replaces_a_path_deleted_in_the_same_snapshot() {
        let (mut db, _dir) = two_documents();

        db.update(|pul| {
            pul.add(ResourceUpdate::delete("doc1"))?;
            pul.add(ResourceUpdate::add("doc1", vec![Fragment::element("new")]))
        })
        .unwrap();

        let pre = db.docs().exact("doc1").unwrap();
        assert_eq!(db.docs().len(), 2);
        assert_eq!(serialize(db.store(), pre), "<new/>");
    }

    #[test]
    fn two_adds_of_one_path_conflict() {
        let (mut db, _dir) = create_test_db();

        let err = db
            .update(|pul| {
                pul.add(ResourceUpdate::add("a.xml", vec![]))?;
                pul.add(ResourceUpdate::add("a.xml", vec![]))
            })
            .unwrap_err();

        assert!(update_error(&err).is_conflict());
    }

    #[test]
    fn rename_onto_an_existing_document_fails() {
        let (mut db, _dir) = two_documents();

        let err = db
            .update(|pul| pul.add(ResourceUpdate::rename("doc0", "doc1")))
            .unwrap_err();

        assert!(update_error(&err).is_validation());
        assert_eq!(db.docs().exact("doc0"), Some(0));
    }

    #[test]
    fn rename_moves_a_directory() {
        let (mut db, _dir) = create_test_db();
        db.create_document("a/x.xml", vec![Fragment::element("x")]).unwrap();
        db.create_document("a/y.xml", vec![Fragment::element("y")]).unwrap();
        db.create_document("ab.xml", vec![Fragment::element("z")]).unwrap();

        db.update(|pul| pul.add(ResourceUpdate::rename("a", "b/c"))).unwrap();

        assert_eq!(
            db.docs().iter().map(|(_, p)| p).collect::<Vec<_>>(),
            vec!["b/c/x.xml", "b/c/y.xml", "ab.xml"]
        );
        assert!(db.docs().is_dir("b"));
        assert!(!db.docs().is_dir("a"));
    }

    #[test]
    fn rename_of_a_directory_onto_existing_documents_fails() {
        let (mut db, _dir) = create_test_db();
        db.create_document("a/1.xml", vec![Fragment::element("x")]).unwrap();
        db.create_document("c/1.xml", vec![Fragment::element("y")]).unwrap();

        let err = db
            .update(|pul| pul.add(ResourceUpdate::rename("a", "c")))
            .unwrap_err();

        assert!(update_error(&err).is_validation());
        assert_eq!(paths(&db), vec![(0, "a/1.xml".to_string()), (2, "c/1.xml".to_string())]);
    }

    #[test]
    fn directory_swap_keeps_paths_unique() {
        let (mut db, _dir) = create_test_db();
        db.create_document("a/1.xml", vec![Fragment::element("x")]).unwrap();
        db.create_document("c/1.xml", vec![Fragment::element("y")]).unwrap();

        db.update(|pul| {
            pul.add(ResourceUpdate::rename("a", "c"))?;
            pul.add(ResourceUpdate::rename("c", "z"))
        })
        .unwrap();

        assert_eq!(paths(&db), vec![(0, "c/1.xml".to_string()), (2, "z/1.xml".to_string())]);
    }

    #[test]
    fn add_of_a_path_a_directory_rename_creates_conflicts() {
        let (mut db, _dir) = create_test_db();
        db.create_document("a/1.xml", vec![Fragment::element("x")]).unwrap();

        let err = db
            .update(|pul| {
                pul.add(ResourceUpdate::rename("a", "c"))?;
                pul.add(ResourceUpdate::add("c/1.xml", vec![Fragment::element("y")]))
            })
            .unwrap_err();

        assert!(update_error(&err).is_conflict());
        assert_eq!(paths(&db), vec![(0, "a/1.xml".to_string())]);
        assert_eq!(db.store().len(), 2);
    }

    #[test]
    fn rename_onto_a_document_deleted_by_a_node_update() {
        let (mut db, _dir) = two_documents();

        db.update(|pul| {
            pul.add(NodeUpdate::delete(0))?;
            pul.add(ResourceUpdate::rename("doc1", "doc0"))
        })
        .unwrap();

        assert_eq!(paths(&db), vec![(0, "doc0".to_string())]);
        assert_eq!(serialize(db.store(), 0), "<c/>");
    }

    #[test]
    fn add_onto_a_document_deleted_by_a_node_update() {
        let (mut db, _dir) = two_documents();

        db.update(|pul| {
            pul.add(NodeUpdate::delete(3))?;
            pul.add(ResourceUpdate::add("doc1", vec![Fragment::element("new")]))
        })
        .unwrap();

        let pre = db.docs().exact("doc1").unwrap();
        assert_eq!(db.docs().len(), 2);
        assert_eq!(serialize(db.store(), pre), "<new/>");
    }

    #[test]
    fn missing_rename_source_is_skipped() {
        let (mut db, _dir) = create_test_db();

        let summary = db
            .update(|pul| pul.add(ResourceUpdate::rename("nothing", "else")))
            .unwrap();

        assert_eq!(summary.skipped, 1);
    }
}

mod blob_tests {
    use super::*;

    #[test]
    fn store_value_and_binary() {
        let (mut db, dir) = create_test_db();

        db.update(|pul| {
            pul.add(ResourceUpdate::store_value("stats/count", b"42".to_vec()))?;
            pul.add(ResourceUpdate::store_binary("img/logo.png", vec![0u8, 1, 2]))
        })
        .unwrap();

        assert_eq!(
            db.blobs().read(ResourceType::Value, "stats/count").unwrap(),
            Some(b"42".to_vec())
        );
        assert_eq!(
            db.blobs().read(ResourceType::Binary, "img/logo.png").unwrap(),
            Some(vec![0u8, 1, 2])
        );
        assert!(dir.path().join("db/raw/img/logo.png").is_file());
    }

    #[test]
    fn duplicate_store_value_conflicts() {
        let (mut db, _dir) = create_test_db();

        let err = db
            .update(|pul| {
                pul.add(ResourceUpdate::store_value("v", b"1".to_vec()))?;
                pul.add(ResourceUpdate::store_value("/v", b"2".to_vec()))
            })
            .unwrap_err();

        assert!(update_error(&err).is_conflict());
        assert_eq!(db.blobs().read(ResourceType::Value, "v").unwrap(), None);
    }

    #[test]
    fn delete_removes_documents_and_blobs_below_a_path() {
        let (mut db, _dir) = create_test_db();
        db.create_document("p/doc.xml", vec![Fragment::element("d")]).unwrap();
        db.create_document("q.xml", vec![Fragment::element("q")]).unwrap();
        db.update(|pul| pul.add(ResourceUpdate::store_binary("p/bin", vec![7u8])))
            .unwrap();

        db.update(|pul| pul.add(ResourceUpdate::delete("p"))).unwrap();

        assert_eq!(paths(&db), vec![(0, "q.xml".to_string())]);
        assert_eq!(db.blobs().read(ResourceType::Binary, "p/bin").unwrap(), None);
    }

    #[test]
    fn rename_moves_blobs() {
        let (mut db, _dir) = create_test_db();
        db.update(|pul| pul.add(ResourceUpdate::store_value("old/v", b"x".to_vec())))
            .unwrap();

        db.update(|pul| pul.add(ResourceUpdate::rename("old", "new"))).unwrap();

        assert_eq!(db.blobs().paths(ResourceType::Value).unwrap(), vec!["new/v".to_string()]);
    }
}

mod database_tests {
    use super::*;

    #[test]
    fn put_writes_the_updated_node() {
        let (mut db, dir) = create_test_db();
        let doc = db.create_document("d.xml", vec![Fragment::element("r")]).unwrap();
        let id = db.store().id(doc + 1);
        let out = dir.path().join("r.xml");

        db.update(|pul| {
            pul.add(NodeUpdate::insert_into(doc + 1, vec![Fragment::text("hi")]))?;
            pul.add(ResourceUpdate::put(id, &out))
        })
        .unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "<r>hi</r>");
    }

    #[test]
    fn put_of_a_deleted_node_fails() {
        let (mut db, dir) = create_test_db();
        let doc = db.create_document("d.xml", vec![Fragment::element("r")]).unwrap();
        let id = db.store().id(doc + 1);

        let err = db
            .update(|pul| {
                pul.add(NodeUpdate::delete(doc + 1))?;
                pul.add(ResourceUpdate::put(id, dir.path().join("r.xml")))
            })
            .unwrap_err();

        assert!(update_error(&err).is_not_found());
        assert_eq!(db.store().len(), 2);
        assert_eq!(serialize(db.store(), doc), "<r/>");
        assert!(!dir.path().join("r.xml").exists());
    }

    #[test]
    fn put_of_a_node_in_a_replaced_document_fails() {
        let (mut db, dir) = create_test_db();
        let doc = db.create_document("d.xml", vec![Fragment::element("r")]).unwrap();
        let id = db.store().id(doc + 1);

        let err = db
            .update(|pul| {
                pul.add(NodeUpdate::replace_document(
                    doc,
                    Fragment::document("d.xml", vec![Fragment::element("s")]),
                ))?;
                pul.add(ResourceUpdate::put(id, dir.path().join("r.xml")))
            })
            .unwrap_err();

        assert!(update_error(&err).is_not_found());
        assert_eq!(serialize(db.store(), doc), "<r/>");
    }

    #[test]
    fn optimize_and_flush() {
        let (mut db, _dir) = create_test_db();
        db.create_document("d.xml", vec![Fragment::element("r")]).unwrap();

        let summary = db
            .update(|pul| {
                pul.add(ResourceUpdate::optimize(false))?;
                pul.add(ResourceUpdate::optimize(true))?;
                pul.add(ResourceUpdate::flush())
            })
            .unwrap();

        assert_eq!(summary.size, 2);
        assert_eq!(db.docs().exact("d.xml"), Some(0));
    }
}
