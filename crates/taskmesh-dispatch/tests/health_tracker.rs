use std::time::Duration;

use proptest::prelude::*;
use taskmesh_dispatch::HealthTracker;

fn paused_runtime() -> tokio::runtime::Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .start_paused(true)
    .build()
    .unwrap()
}

proptest! {
  // An address blacklisted at t for d is never reported at t + d or later,
  // and always reported before that.
  #[test]
  fn test_blacklist_expiry(
    duration_ms in 1u64..100_000,
    query_offsets in proptest::collection::vec(0u64..200_000, 1..8),
  ) {
    let rt = paused_runtime();
    rt.block_on(async {
      let tracker = HealthTracker::new();
      let start = tokio::time::Instant::now();
      tracker.blacklist("node-a", Duration::from_millis(duration_ms));

      let mut offsets = query_offsets;
      offsets.sort_unstable();
      for offset in offsets {
        let target = start + Duration::from_millis(offset);
        let now = tokio::time::Instant::now();
        if target > now {
          tokio::time::advance(target - now).await;
        }
        let expected = offset < duration_ms;
        prop_assert_eq!(tracker.is_blacklisted("node-a"), expected);
      }
      Ok(())
    })?;
  }

  #[test]
  fn test_purge_keeps_only_live_entries(
    durations in proptest::collection::vec(1u64..1_000, 1..20),
    elapsed in 0u64..1_000,
  ) {
    let rt = paused_runtime();
    rt.block_on(async {
      let tracker = HealthTracker::new();
      for (i, duration) in durations.iter().enumerate() {
        tracker.blacklist(&format!("node-{}", i), Duration::from_millis(*duration));
      }
      tokio::time::advance(Duration::from_millis(elapsed)).await;

      let live = durations.iter().filter(|d| **d > elapsed).count();
      tracker.purge_expired();
      prop_assert_eq!(tracker.len(), live);
      Ok(())
    })?;
  }
}
