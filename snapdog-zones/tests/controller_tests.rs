//! Integration tests for controller startup, restoration and client commands.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{client, config, BackendCall, FakeBackend, FakeCatalog, FakePlayer, Fixture};
use snapdog_zones::{
    BackendGroup, ClientId, ClientIndex, ConfigError, ConfigurationFingerprint, PlaybackState,
    ServiceError, SnapDogConfig, StartupDecision, ZoneController, ZoneError, ZoneIndex,
    ZoneSyncOutcome, DEFAULT_ZONE_VOLUME,
};

fn home() -> SnapDogConfig {
    let mut config = config(
        &["Living Room", "Kitchen"],
        &[("Sofa", 1), ("Shelf", 1), ("Counter", 2)],
    );
    config.reconciler.enabled = false;
    config
}

fn fixture(backend: FakeBackend) -> Fixture {
    Fixture::new(
        backend,
        vec![
            client(1, "a", "Sofa", 1),
            client(2, "b", "Shelf", 1),
            client(3, "c", "Counter", 2),
        ],
    )
}

#[tokio::test]
async fn test_first_run_persists_fingerprint() {
    let fixture = fixture(FakeBackend::default());
    let controller = fixture.controller(home());

    let decision = controller.start().await;

    assert_eq!(decision, StartupDecision::FirstRun);
    assert_eq!(
        fixture.store.stored_fingerprint().map(|f| f.hash),
        Some(ConfigurationFingerprint::compute(&home()).hash)
    );
    assert_eq!(
        controller.zone_indices().await,
        vec![ZoneIndex::new(1), ZoneIndex::new(2)]
    );
    assert_eq!(controller.get_all_zone_states().await.len(), 2);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_with_same_configuration_restores_state() {
    let fixture = fixture(FakeBackend::default());

    let first = fixture.controller(home());
    first.start().await;
    first.zone(ZoneIndex::new(1)).await.unwrap().play().await.unwrap();
    first
        .zone(ZoneIndex::new(2))
        .await
        .unwrap()
        .set_volume(30)
        .await
        .unwrap();
    first
        .assign_client(ClientIndex::new(3), ZoneIndex::new(1))
        .await
        .unwrap();
    first.shutdown().await;

    let second_run = Fixture {
        player: FakePlayer::new(),
        ..fixture.clone()
    };
    let second = second_run.controller(home());
    let decision = second.start().await;

    assert!(matches!(decision, StartupDecision::Restore { .. }));
    assert_eq!(decision.zones_to_resume(), vec![ZoneIndex::new(1)]);
    assert_eq!(
        second.cached_zone_state(ZoneIndex::new(2)).unwrap().volume,
        30
    );
    assert_eq!(
        second
            .client_state(ClientIndex::new(3))
            .await
            .unwrap()
            .zone_index,
        ZoneIndex::new(1)
    );

    second.wait_for_resume().await;
    assert_eq!(second_run.player.played_zones(), vec![ZoneIndex::new(1)]);
    let living_room = second.zone(ZoneIndex::new(1)).await.unwrap();
    assert_eq!(living_room.playback_state(), PlaybackState::Playing);

    second.shutdown().await;
}

#[tokio::test]
async fn test_changed_configuration_discards_state() {
    let fixture = fixture(FakeBackend::default());

    let first = fixture.controller(home());
    first.start().await;
    first
        .zone(ZoneIndex::new(1))
        .await
        .unwrap()
        .set_volume(20)
        .await
        .unwrap();
    first
        .assign_client(ClientIndex::new(3), ZoneIndex::new(1))
        .await
        .unwrap();
    first.shutdown().await;

    let mut renamed = home();
    renamed.zones[1].name = "Dining".to_string();
    let second = fixture.controller(renamed.clone());
    let decision = second.start().await;

    assert_eq!(
        decision,
        StartupDecision::Discard {
            previous_hash: ConfigurationFingerprint::compute(&home()).hash
        }
    );
    let living_room = second.cached_zone_state(ZoneIndex::new(1)).unwrap();
    assert_eq!(living_room.volume, DEFAULT_ZONE_VOLUME);
    assert_eq!(living_room.playback_state, PlaybackState::Stopped);
    assert_eq!(
        second
            .client_state(ClientIndex::new(3))
            .await
            .unwrap()
            .zone_index,
        ZoneIndex::new(2)
    );
    assert_eq!(
        fixture.store.stored_fingerprint().map(|f| f.hash),
        Some(ConfigurationFingerprint::compute(&renamed).hash)
    );

    second.wait_for_resume().await;
    assert!(fixture.player.plays().is_empty());
    second.shutdown().await;
}

#[tokio::test]
async fn test_unhealthy_store_starts_fresh() {
    let fixture = fixture(FakeBackend::default());
    fixture.store.set_healthy(false);
    let controller = fixture.controller(home());

    assert_eq!(controller.start().await, StartupDecision::StoreUnavailable);
    assert!(controller.zone_exists(ZoneIndex::new(2)).await);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_assign_client_regroups_backend() {
    let backend = FakeBackend::new(vec![
        BackendGroup::new("g1", "Zone1", "Living Room")
            .with_member("a", "Sofa")
            .with_member("b", "Shelf"),
        BackendGroup::new("g2", "Zone2", "Kitchen").with_member("c", "Counter"),
    ]);
    let fixture = fixture(backend);
    let controller = fixture.controller(home());
    controller.start().await;

    controller
        .assign_client(ClientIndex::new(3), ZoneIndex::new(1))
        .await
        .unwrap();

    // Waits for the triggered pass, then finds the zone converged
    let outcome = controller.synchronize_zone(ZoneIndex::new(1)).await.unwrap();
    assert!(matches!(outcome, ZoneSyncOutcome::Converged { .. }));

    let g1 = fixture.backend.group("g1").unwrap();
    let members: HashSet<&str> = g1.member_ids().map(|id| id.as_str()).collect();
    assert_eq!(members, HashSet::from(["a", "b", "c"]));

    assert_eq!(
        controller
            .assign_client(ClientIndex::new(3), ZoneIndex::new(9))
            .await,
        Err(ZoneError::ZoneNotFound(ZoneIndex::new(9)))
    );
    assert_eq!(
        controller
            .assign_client(ClientIndex::new(9), ZoneIndex::new(1))
            .await,
        Err(ZoneError::ClientNotFound(ClientIndex::new(9)))
    );

    controller.shutdown().await;
}

#[tokio::test]
async fn test_client_commands_reach_backend() {
    let fixture = fixture(FakeBackend::default());
    let controller = fixture.controller(home());
    controller.start().await;
    let sofa = ClientIndex::new(1);

    controller.set_client_volume(sofa, 140).await.unwrap();
    controller.set_client_mute(sofa, true).await.unwrap();
    controller.set_client_latency(sofa, 40).await.unwrap();

    assert_eq!(
        fixture.backend.calls(),
        vec![
            BackendCall::SetClientVolume(ClientId::new("a"), 100),
            BackendCall::SetClientMute(ClientId::new("a"), true),
            BackendCall::SetClientLatency(ClientId::new("a"), 40),
        ]
    );
    let state = controller.client_state(sofa).await.unwrap();
    assert_eq!((state.volume, state.mute, state.latency_ms), (100, true, 40));
    assert_eq!(fixture.store.client_state(sofa).unwrap().latency_ms, 40);

    assert!(matches!(
        controller.set_client_latency(sofa, -5).await,
        Err(ZoneError::InvalidArgument(_))
    ));

    controller.shutdown().await;
}

#[tokio::test]
async fn test_client_command_failures() {
    let fixture = Fixture::new(
        FakeBackend::default(),
        vec![client(1, "a", "Sofa", 1), client(2, "b", "Shelf", 1)],
    );
    fixture.backend.fail_client("a");
    let controller = fixture.controller(home());
    controller.start().await;

    assert!(matches!(
        controller.set_client_volume(ClientIndex::new(1), 10).await,
        Err(ZoneError::Service(ServiceError::Backend(_)))
    ));
    assert_eq!(
        controller
            .client_state(ClientIndex::new(1))
            .await
            .unwrap()
            .volume,
        100
    );

    // Client 3 has not been seen by the backend yet
    assert!(matches!(
        controller.set_client_mute(ClientIndex::new(3), true).await,
        Err(ZoneError::InvalidArgument(_))
    ));

    controller.shutdown().await;
}

#[tokio::test]
async fn test_state_changes_are_published_and_persisted() {
    let fixture = fixture(FakeBackend::default());
    let controller = fixture.controller(home());
    controller.start().await;

    let zone = controller.zone(ZoneIndex::new(1)).await.unwrap();
    zone.set_volume(25).await.unwrap();
    assert_eq!(
        controller.cached_zone_state(ZoneIndex::new(1)).unwrap().volume,
        25
    );

    controller.shutdown().await;

    let events = fixture.publisher.events_for(ZoneIndex::new(1));
    assert_eq!(events.last().map(|e| e.state.volume), Some(25));
    assert_eq!(
        fixture.store.zone_state(ZoneIndex::new(1)).map(|s| s.volume),
        Some(25)
    );
}

#[tokio::test]
async fn test_builder_requires_collaborators() {
    let result = ZoneController::builder(home())
        .player(Arc::new(FakePlayer::new()))
        .catalog(Arc::new(FakeCatalog::with_playlists(&[1])))
        .build();
    assert!(matches!(result, Err(ConfigError::Invalid(_))));

    let result = ZoneController::builder(SnapDogConfig::new(Vec::new(), Vec::new()))
        .backend(Arc::new(FakeBackend::default()))
        .player(Arc::new(FakePlayer::new()))
        .catalog(Arc::new(FakeCatalog::with_playlists(&[1])))
        .build();
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
