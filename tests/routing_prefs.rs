use intentbridge::bridge::{LinkCategory, RoutingPrefs};
use intentbridge::role::{Role, RoleStore};

#[test]
fn routing_preferences_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let prefs = RoutingPrefs::open(Some(dir.path())).unwrap();
        prefs
            .set_preferred_role(LinkCategory::Browser, Role::PrivateSpace)
            .unwrap();
        assert!(prefs.apply_remote_update("maps", "PERSONAL_SPACE"));
    }
    let prefs = RoutingPrefs::open(Some(dir.path())).unwrap();
    assert_eq!(prefs.preferred_role(LinkCategory::Browser), Role::PrivateSpace);
    assert_eq!(prefs.preferred_role(LinkCategory::Maps), Role::PersonalSpace);
    assert_eq!(prefs.preferred_role(LinkCategory::Tel), Role::PersonalSpace);

    let raw = std::fs::read_to_string(dir.path().join("link_routing_prefs.json")).unwrap();
    assert!(raw.contains("\"preferred_browser\""));
}

#[test]
fn snapshot_round_trips_between_contexts() {
    let a = RoutingPrefs::in_memory();
    let b = RoutingPrefs::in_memory();
    a.set_preferred_role(LinkCategory::Mail, Role::PrivateSpace).unwrap();
    a.set_preferred_role(LinkCategory::Maps, Role::PersonalSpace).unwrap();
    assert!(b.apply_snapshot(&a.snapshot()));
    for category in LinkCategory::ALL {
        assert_eq!(a.preferred_role(category), b.preferred_role(category));
    }
}

#[test]
fn role_store_persists_role() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = RoleStore::open(Some(dir.path())).unwrap();
        assert_eq!(store.role().unwrap(), Role::PersonalSpace);
        store.set_role(Role::PrivateSpace).unwrap();
    }
    let mut store = RoleStore::open(Some(dir.path())).unwrap();
    assert_eq!(store.role().unwrap(), Role::PrivateSpace);
}
