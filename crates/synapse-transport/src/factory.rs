//! Adapter construction.
//!
//! One transport per platform, selected at construction time. The
//! coordinator never knows which variant it is driving.

use std::sync::Arc;
use std::time::Duration;

use synapse_core::Result;
use synapse_settings::SyncSettings;
use tracing::info;

use crate::adapter::{PeerFilter, TransportAdapter, TransportKind};
use crate::artifacts::StagingArea;
use crate::bus::BusSocketAdapter;
use crate::native::NativeApiAdapter;
use crate::notify::NotifyBusAdapter;
use crate::runner::TokioCommandRunner;
use crate::supervisor::BackoffPolicy;

/// Build the adapter for an explicit transport kind.
pub async fn build_adapter(
    kind: TransportKind,
    settings: &SyncSettings,
) -> Result<Arc<dyn TransportAdapter>> {
    let filter = PeerFilter::new(&settings.allowed_apps, &settings.allowed_kinds)?;
    let backoff = BackoffPolicy {
        base: Duration::from_millis(settings.relaunch_backoff_ms),
        cap: Duration::from_millis(settings.relaunch_backoff_cap_ms),
    };
    info!(transport = kind.as_str(), "constructing transport adapter");
    match kind {
        TransportKind::NotifyBus => Ok(Arc::new(NotifyBusAdapter::new(
            settings.notify.clone(),
            Arc::new(TokioCommandRunner),
            StagingArea::new(settings.staging_dir.clone())?,
            filter,
            backoff,
        ))),
        TransportKind::NativeApi => Ok(Arc::new(
            NativeApiAdapter::detect(settings, Arc::new(TokioCommandRunner)).await?,
        )),
        TransportKind::BusSocket => Ok(Arc::new(
            BusSocketAdapter::connect(
                settings.bus.socket_path.clone(),
                settings.emulation,
                filter,
            )
            .await,
        )),
    }
}

/// The transport kind native to the build target.
#[must_use]
pub fn platform_kind() -> TransportKind {
    if cfg!(target_os = "macos") {
        TransportKind::NotifyBus
    } else if cfg!(target_os = "windows") {
        TransportKind::NativeApi
    } else {
        TransportKind::BusSocket
    }
}

/// Build the adapter for the current platform.
pub async fn build_platform_adapter(settings: &SyncSettings) -> Result<Arc<dyn TransportAdapter>> {
    build_adapter(platform_kind(), settings).await
}
