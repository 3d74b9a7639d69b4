//! WiFi station management.
//!
//! Joining is blocking. Link loss is reported asynchronously through the
//! system event loop so the framework can schedule a reconnect.

use anyhow::{anyhow, bail, Result};
use espfw_core::connectivity::NetEvent;
use espfw_core::Event;
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi, WifiEvent},
};
use log::{info, warn};
use std::sync::mpsc::Sender;

/// Join `ssid` and wait for a DHCP lease.
///
/// Scans first so the channel is known, which shortens the association.
/// Returns the assigned IP address.
pub fn connect_wifi(
    esp_wifi: &mut EspWifi<'static>,
    sysloop: EspSystemEventLoop,
    ssid: &str,
    password: &str,
) -> Result<String> {
    if ssid.is_empty() {
        bail!("WiFi SSID cannot be empty");
    }

    let auth_method = if password.is_empty() {
        info!("WiFi password is empty, using open network");
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
    if wifi.is_connected()? {
        wifi.disconnect()?;
    }

    if !wifi.is_started()? {
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        wifi.start()?;
    }

    info!("Scanning for WiFi networks...");
    let channel = wifi
        .scan()?
        .into_iter()
        .find(|ap| ap.ssid == ssid)
        .map(|ap| {
            info!("Found '{}' on channel {}", ssid, ap.channel);
            ap.channel
        });
    if channel.is_none() {
        info!("Network '{}' not found in scan, will try anyway", ssid);
    }

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid
            .try_into()
            .map_err(|_| anyhow!("SSID too long (max 32 chars)"))?,
        password: password
            .try_into()
            .map_err(|_| anyhow!("Password too long (max 64 chars)"))?,
        channel,
        auth_method,
        ..Default::default()
    }))?;

    info!("Connecting to '{}'...", ssid);
    wifi.connect()?;

    info!("Waiting for DHCP lease...");
    wifi.wait_netif_up()?;

    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
    info!("  IP address: {}", ip_info.ip);
    info!("  Gateway:    {}", ip_info.subnet.gateway);
    info!("  Netmask:    {}", ip_info.subnet.mask);

    Ok(ip_info.ip.to_string())
}

/// Forward station disconnects to the framework. Keep the subscription alive
/// for as long as events should flow.
pub fn watch_disconnects(
    sysloop: &EspSystemEventLoop,
    events: Sender<Event>,
) -> Result<EspSubscription<'static, System>> {
    let subscription = sysloop.subscribe::<WifiEvent, _>(move |event| {
        if let WifiEvent::StaDisconnected(_) = event {
            if events.send(Event::Net(NetEvent::WifiDisconnected)).is_err() {
                warn!("Framework event channel closed");
            }
        }
    })?;
    Ok(subscription)
}
