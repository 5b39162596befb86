use std::fs;

use chainstate::{
    config::Config,
    def::TAG_RECORD_SIZE,
    navigator::{ChainNavigator, NavigatorError, TagId, ROOT_TAG},
    test_helper::{commit_delta, tag_info, CounterHost},
};
use serial_test::serial;
use tempfile::Builder;

fn store_path(dir: &tempfile::TempDir) -> String {
    dir.path().join("chain.nav").to_string_lossy().to_string()
}

fn check<H: chainstate::PatchHost>(nav: &mut ChainNavigator<H>) {
    nav.assert_valid().unwrap();
    nav.verify_header().unwrap();
}

fn counters(nav: &ChainNavigator<&mut CounterHost>) -> Vec<u32> {
    CounterHost::counters(nav.get_hdr())
}

#[test]
#[serial]
fn test_navigation_scenario() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = Builder::new().prefix("navigator").tempdir().unwrap();
    let config = Config::from_path(&store_path(&dir));
    let mut host = CounterHost::new();

    let mut nav = ChainNavigator::open(&mut host, &config).unwrap();
    check(&mut nav);

    let t15 = nav.create_tag(tag_info(15)).unwrap();
    commit_delta(&mut nav, 0, 3).unwrap();
    check(&mut nav);
    commit_delta(&mut nav, 1, 4).unwrap();
    check(&mut nav);
    nav.move_bwd().unwrap();
    check(&mut nav);
    assert_eq!(vec![0u32; CounterHost::COUNTERS], counters(&nav));

    let t76 = nav.create_tag(tag_info(76)).unwrap();
    commit_delta(&mut nav, 0, 10).unwrap();
    commit_delta(&mut nav, 2, -1).unwrap();
    check(&mut nav);
    nav.move_bwd().unwrap();
    check(&mut nav);

    // best first: the higher difficulty leads
    let mut children = Vec::new();
    let mut child = nav.get_child_tag();
    while let Some(t) = child {
        nav.move_fwd(t).unwrap();
        check(&mut nav);
        children.push((t, counters(&nav)[..3].to_vec()));
        nav.move_bwd().unwrap();
        check(&mut nav);
        child = nav.get_next_tag(t);
    }
    assert_eq!(
        vec![(t76, vec![10, 0, u32::MAX]), (t15, vec![3, 4, 0])],
        children
    );

    let first = nav.get_child_tag().unwrap();
    nav.move_fwd(first).unwrap();
    let hdr = nav.get_hdr().to_vec();
    nav.close().unwrap();

    let mut nav = ChainNavigator::open(&mut host, &config).unwrap();
    check(&mut nav);
    assert_eq!(first, nav.cursor());
    assert_eq!(hdr, nav.get_hdr());

    let t44 = nav.create_tag(tag_info(44)).unwrap();
    commit_delta(&mut nav, 5, 8).unwrap();
    check(&mut nav);
    nav.move_bwd().unwrap();
    assert_eq!(first, nav.cursor());
    assert_eq!(Some(t44), nav.get_child_tag());

    let slots = nav.mapping().live_slots();
    nav.delete_tag(nav.cursor()).unwrap();
    check(&mut nav);
    assert_eq!(ROOT_TAG, nav.cursor());
    assert_eq!(slots - 3, nav.mapping().live_slots());
    assert!(nav.tag(t44).is_none());
    assert!(nav.tag(first).is_none());
    assert_eq!(vec![t15], nav.children(ROOT_TAG).collect::<Vec<_>>());
    assert_eq!(None, nav.get_next_tag(t15));
    assert_eq!(vec![0u32; CounterHost::COUNTERS], counters(&nav));

    nav.move_fwd(t15).unwrap();
    assert_eq!(&[3, 4], &counters(&nav)[..2]);
    check(&mut nav);
    nav.close().unwrap();
    assert!(host.applied > 0);
}

#[test]
#[serial]
fn test_move_to_across_branches() {
    let dir = Builder::new().prefix("navigator").tempdir().unwrap();
    let config = Config::from_path(&store_path(&dir));
    let mut nav = ChainNavigator::open(CounterHost::new(), &config).unwrap();

    // two chains forking at a common tag
    let base = nav.create_tag(tag_info(1)).unwrap();
    commit_delta(&mut nav, 0, 1).unwrap();
    let a1 = nav.create_tag(tag_info(2)).unwrap();
    commit_delta(&mut nav, 1, 2).unwrap();
    let a2 = nav.create_tag(tag_info(3)).unwrap();
    commit_delta(&mut nav, 1, 3).unwrap();
    nav.move_to(base).unwrap();
    let b1 = nav.create_tag(tag_info(9)).unwrap();
    commit_delta(&mut nav, 2, 7).unwrap();
    nav.move_bwd().unwrap();
    assert_eq!(vec![b1, a1], nav.children(base).collect::<Vec<_>>());

    nav.move_to(a2).unwrap();
    assert_eq!(&[1, 5, 0], &CounterHost::counters(nav.get_hdr())[..3]);
    nav.verify_header().unwrap();
    nav.move_to(b1).unwrap();
    assert_eq!(&[1, 0, 7], &CounterHost::counters(nav.get_hdr())[..3]);
    nav.verify_header().unwrap();
    nav.move_to(ROOT_TAG).unwrap();
    assert!(nav.get_hdr().iter().all(|&b| b == 0));
    assert!(matches!(
        nav.move_to(TagId(1000)),
        Err(NavigatorError::UnknownTag(_))
    ));

    // deleting a branch the cursor is not on leaves the cursor alone
    nav.move_to(b1).unwrap();
    nav.delete_tag(a1).unwrap();
    assert_eq!(b1, nav.cursor());
    assert!(nav.tag(a2).is_none());
    nav.assert_valid().unwrap();
    nav.verify_header().unwrap();
}

#[test]
#[serial]
fn test_out_of_space_keeps_state() {
    let dir = Builder::new().prefix("navigator").tempdir().unwrap();
    let mut config = Config::from_path(&store_path(&dir));
    config.set_region_capacity(TAG_RECORD_SIZE + 2 * CounterHost::PATCH_SIZE);
    let mut nav = ChainNavigator::open(CounterHost::new(), &config).unwrap();

    nav.create_tag(tag_info(1)).unwrap();
    commit_delta(&mut nav, 0, 1).unwrap();
    commit_delta(&mut nav, 0, 1).unwrap();
    let hdr = nav.get_hdr().to_vec();
    let used = nav.mapping().used();

    match commit_delta(&mut nav, 0, 1) {
        Err(NavigatorError::OutOfSpace {
            requested,
            available,
        }) => {
            assert_eq!(CounterHost::PATCH_SIZE, requested);
            assert_eq!(0, available);
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(matches!(
        nav.create_tag(tag_info(2)),
        Err(NavigatorError::OutOfSpace { .. })
    ));
    assert_eq!(hdr, nav.get_hdr());
    assert_eq!(used, nav.mapping().used());
    nav.assert_valid().unwrap();
}

#[test]
#[serial]
fn test_drop_flushes_and_sync_on_commit() {
    let dir = Builder::new().prefix("navigator").tempdir().unwrap();
    let path = store_path(&dir);

    let tag = {
        let mut nav = ChainNavigator::open(CounterHost::new(), &Config::from_path(&path)).unwrap();
        let tag = nav.create_tag(tag_info(5)).unwrap();
        commit_delta(&mut nav, 4, 9).unwrap();
        tag
    };
    let nav = ChainNavigator::open(CounterHost::new(), &Config::from_path(&path)).unwrap();
    assert_eq!(tag, nav.cursor());
    assert_eq!(9, CounterHost::counters(nav.get_hdr())[4]);
    nav.close().unwrap();

    let mut config = Config::from_path(&path);
    config.set_sync_on_commit(true);
    let mut nav = ChainNavigator::open(CounterHost::new(), &config).unwrap();
    let seq = nav.mapping().seq();
    commit_delta(&mut nav, 4, 1).unwrap();
    // allocate and commit each wrote an image
    assert_eq!(seq + 2, nav.mapping().seq());
}

#[test]
#[serial]
fn test_open_corrupt_store() {
    let dir = Builder::new().prefix("navigator").tempdir().unwrap();
    let path = store_path(&dir);
    fs::write(format!("{}.0", path), b"definitely not a region image").unwrap();
    match ChainNavigator::open(CounterHost::new(), &Config::from_path(&path)) {
        Err(err) => assert!(err.is_corrupt(), "unexpected error {}", err),
        Ok(_) => panic!("corrupt store opened"),
    }
}
