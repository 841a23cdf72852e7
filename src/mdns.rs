//! Find cast devices on the local network with mDNS.

use anyhow::{format_err, Error};
use crate::{Result, util::named};
use futures::{Stream, TryStreamExt};
use ::mdns::{self as mdns_lib, Record, RecordKind, Response};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use tokio::pin;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Device {
    pub addr: SocketAddr,
    pub service_host: String,
    pub display_name: String,
    pub model: Option<String>,

    /// Name of the application the device is running, if any.
    pub app_name: Option<String>,
    pub uuid: Option<String>,
}

pub const SERVICE_NAME: &str = "_googlecast._tcp.local";

#[derive(Clone, Debug)]
pub enum Target {
    First,
    DisplayName(String),
    Id(String),
}

/// Period between mDNS queries while browsing. The first query goes out after one period.
const QUERY_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Responses to repeated queries for cast devices.
fn browse() -> Result<impl Stream<Item = Result<Response>>> {
    Ok(mdns_lib::discover::all(SERVICE_NAME, QUERY_INTERVAL)?
           .listen()
           .err_into::<Error>())
}

/// The first device matching `target` to answer within `timeout`.
#[tracing::instrument(level = "debug", ret, err)]
pub async fn resolve_target(target: &Target, timeout: Duration) -> Result<Device> {
    let matches = browse()?
        .map_ok(|resp| devices_from_mdns_response(&resp)
                           .into_iter()
                           .find(|device| device.matches(target)))
        .try_filter_map(|device| futures::future::ready(Ok(device)));

    pin!(matches);

    tokio::time::timeout(timeout, matches.try_next()).await
        .map_err(|_elapsed| format_err!("resolve_target: timed out\n\
                                         _ target  = {target:?}\n\
                                         _ timeout = {timeout:?}"))??
        .ok_or_else(|| format_err!("resolve_target: device not found\n\
                                    _ target = {target:?}"))
}

/// Every device that answers within `timeout`, ordered by display name.
#[named]
pub async fn discover(timeout: Duration) -> Result<Vec<Device>> {
    let responses = browse()?;
    pin!(responses);

    let deadline = tokio::time::Instant::now() + timeout;
    let mut devices = BTreeMap::<String, Device>::new();

    loop {
        let resp = match tokio::time::timeout_at(deadline, responses.try_next()).await {
            Err(_) | Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(err),
            Ok(Ok(Some(resp))) => resp,
        };

        for device in devices_from_mdns_response(&resp) {
            devices.insert(device.service_host.clone(), device);
        }
    }

    tracing::debug!(target: function_path!(),
                    count = devices.len(),
                    "discover done");

    let mut devices = devices.into_values().collect::<Vec<_>>();
    devices.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    Ok(devices)
}

/// Devices fully described by one response: a service PTR record with its SRV record,
/// and an address record for the SRV target. TXT fields are optional.
#[named]
pub fn devices_from_mdns_response(resp: &Response) -> Vec<Device> {
    const FUNCTION_PATH: &str = function_path!();

    tracing::trace!(target: FUNCTION_PATH,
                    ?resp,
                    "answers.len" = resp.answers.len(),
                    "additional.len" = resp.additional.len(),
                    "mdns::Response");

    let service_hosts = records(resp)
        .filter(|rec| rec.name == SERVICE_NAME)
        .filter_map(|rec| match &rec.kind {
            RecordKind::PTR(host) => Some(host.as_str()),
            _ => None,
        });

    let mut devices = Vec::new();

    for service_host in service_hosts {
        let Some((target, port)) = find_record(resp, service_host, |kind| match kind {
            RecordKind::SRV { target, port, .. } => Some((target.as_str(), *port)),
            _ => None,
        }) else {
            tracing::trace!(target: FUNCTION_PATH, service_host, "no SRV record");
            continue;
        };

        let Some(ip) = find_record(resp, target, |kind| match kind {
            RecordKind::A(ip) => Some(IpAddr::from(*ip)),
            RecordKind::AAAA(ip) => Some(IpAddr::from(*ip)),
            _ => None,
        }) else {
            tracing::trace!(target: FUNCTION_PATH, service_host, srv_target = target,
                            "no address record");
            continue;
        };

        let txt = find_record(resp, service_host, |kind| match kind {
            RecordKind::TXT(entries) => Some(entries.as_slice()),
            _ => None,
        }).unwrap_or_default();

        let mut device = Device {
            addr: SocketAddr::from((ip, port)),
            service_host: service_host.to_string(),
            display_name: format!("{ip}:{port}"),
            model: None,
            app_name: None,
            uuid: None,
        };

        for (key, value) in txt.iter().filter_map(|entry| entry.split_once('=')) {
            match key {
                "fn" => device.display_name = value.to_string(),
                "md" => device.model = Some(value.to_string()),
                "rs" => device.app_name = Some(value.to_string()),
                "id" => device.uuid = Some(value.to_string()),
                _ => (),
            }
        }

        tracing::trace!(target: FUNCTION_PATH, ?device, "device");

        devices.push(device);
    }

    devices
}

fn records(resp: &Response) -> impl Iterator<Item = &Record> {
    resp.answers.iter().chain(resp.additional.iter())
}

fn find_record<'a, T>(resp: &'a Response, name: &str,
                      select: impl Fn(&'a RecordKind) -> Option<T>)
-> Option<T>
{
    records(resp)
        .filter(|rec| rec.name == name)
        .find_map(|rec| select(&rec.kind))
}

impl Device {
    pub fn matches(&self, target: &Target) -> bool {
        match target {
            Target::First => true,
            Target::DisplayName(name) => &self.display_name == name,
            Target::Id(id) => self.uuid.as_ref() == Some(id),
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{name:<24} {addr:<22} {model:<16} {app}",
               name = self.display_name,
               addr = self.addr.to_string(),
               model = self.model.as_deref().unwrap_or("-"),
               app = self.app_name.as_deref().unwrap_or("-"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    const ID_UUID: &str = "3123456789-abcd-0123-4567-89abcdef0123";

    fn response(with_address: bool) -> (Response, String) {
        let class = dns_parser::Class::IN;
        let ttl = 120_u32;

        let id = ID_UUID.replace('-', "");
        let srv_name = format!("Chromecast-{id}.{SERVICE_NAME}");
        let a_name = format!("{ID_UUID}.local");

        let mut additional = vec![
            Record {
                name: srv_name.clone(),
                kind: RecordKind::TXT([
                    format!("id={id}"),
                    "ve=05".to_string(),
                    "md=Chromecast Audio".to_string(),
                    "fn=Kitchen speaker".to_string(),
                    "st=0".to_string(),
                    "no-separator".to_string(),
                    "rs=Default Media Receiver".to_string(),
                ].into()),
                class, ttl
            },
            Record {
                name: srv_name.clone(),
                kind: RecordKind::SRV {
                    priority: 0, weight: 0, port: 8009,
                    target: a_name.clone(),
                },
                class, ttl
            },
        ];

        if with_address {
            additional.push(Record {
                name: a_name,
                kind: RecordKind::A(Ipv4Addr::from([192, 168, 1, 20])),
                class, ttl
            });
        }

        let resp = Response {
            answers: vec![
                Record {
                    name: SERVICE_NAME.to_string(),
                    kind: RecordKind::PTR(srv_name.clone()),
                    class, ttl
                },
            ],
            nameservers: vec![],
            additional,
        };

        (resp, srv_name)
    }

    #[test]
    fn device_from_full_response() {
        let (resp, srv_name) = response(true);

        let devices = devices_from_mdns_response(&resp);
        assert_eq!(devices.len(), 1);

        let device = &devices[0];
        assert_eq!(device.service_host, srv_name);
        assert_eq!(device.addr, SocketAddr::from(([192, 168, 1, 20], 8009)));
        assert_eq!(device.display_name, "Kitchen speaker");
        assert_eq!(device.model.as_deref(), Some("Chromecast Audio"));
        assert_eq!(device.app_name.as_deref(), Some("Default Media Receiver"));
        assert_eq!(device.uuid, Some(ID_UUID.replace('-', "")));

        assert!(device.matches(&Target::First));
        assert!(device.matches(&Target::DisplayName("Kitchen speaker".into())));
        assert!(!device.matches(&Target::Id(ID_UUID.into())));
    }

    #[test]
    fn device_without_address_is_skipped() {
        let (resp, _) = response(false);
        assert!(devices_from_mdns_response(&resp).is_empty());
    }
}
