use crate::collectors::netif::MAX_IFNAME_BYTES;
use crate::state::{CpuUsage, LoadAverages, MemoryStats, NetInterface, Snapshot};
use serde::Serialize;
use std::borrow::Cow;
use std::net::Ipv4Addr;

/// Upper bound for one encoded `{"ifname":"...","ipv4":"..."}` entry
/// including separators and pretty-print indentation.
pub const MAX_IFACE_ENTRY_BYTES: usize = 64 + MAX_IFNAME_BYTES * 6 + 15;

const FIXED_BODY_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Cpu,
    Load,
    Uptime,
    Procs,
    Cores,
    Net,
    Mem,
    All,
    Unknown,
}

impl Route {
    pub fn from_path(path: &str) -> Self {
        match path {
            "/cpu" => Self::Cpu,
            "/load" => Self::Load,
            "/uptime" => Self::Uptime,
            "/procs" => Self::Procs,
            "/cores" => Self::Cores,
            "/net" => Self::Net,
            "/mem" => Self::Mem,
            "/" => Self::All,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Load => "load",
            Self::Uptime => "uptime",
            Self::Procs => "procs",
            Self::Cores => "cores",
            Self::Net => "net",
            Self::Mem => "mem",
            Self::All => "all",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    text: Cow<'a, str>,
}

impl<'a> Request<'a> {
    pub fn from_bytes(buf: &'a [u8]) -> Self {
        let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
        let buf = buf.strip_suffix(b"\r").unwrap_or(buf);
        Self {
            text: String::from_utf8_lossy(buf),
        }
    }

    pub fn line(&self) -> &str {
        self.text.lines().next().unwrap_or("")
    }

    // Only GET with an exactly matching path is routed.
    pub fn route(&self) -> Route {
        let mut parts = self.line().split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("GET"), Some(target)) => {
                let path = target.split_once('?').map_or(target, |(p, _)| p);
                Route::from_path(path)
            }
            _ => Route::Unknown,
        }
    }
}

#[derive(Serialize)]
struct CpuJson {
    us: f64,
    sy: f64,
    id: f64,
    wa: f64,
    ni: f64,
}

#[derive(Serialize)]
struct NetIfJson<'a> {
    ifname: &'a str,
    ipv4: Ipv4Addr,
}

#[derive(Serialize)]
struct MemJson {
    total_ram: u64,
    free_ram: u64,
    shared_ram: u64,
    buffer_ram: u64,
    total_swap: u64,
    free_swap: u64,
    total_high: u64,
    free_high: u64,
    mem_unit: u32,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Body<'a> {
    Cpu {
        cpu: CpuJson,
    },
    Load {
        load: [f64; 3],
    },
    Uptime {
        uptime: [u64; 3],
    },
    Procs {
        procs: u64,
    },
    Cores {
        cores: u32,
    },
    Net {
        netifs: Vec<NetIfJson<'a>>,
    },
    Mem {
        mem: MemJson,
    },
    All {
        cpu: CpuJson,
        load: [f64; 3],
        uptime: [u64; 3],
        procs: u64,
        cores: u32,
        netifs: Vec<NetIfJson<'a>>,
        mem: MemJson,
    },
    Err {
        err: u8,
    },
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let scale = 10_f64.powi(decimals);
    (v * scale).round() / scale
}

fn cpu_json(cpu: &CpuUsage) -> CpuJson {
    CpuJson {
        us: round_to(cpu.user, 1),
        sy: round_to(cpu.system, 1),
        id: round_to(cpu.idle, 1),
        wa: round_to(cpu.iowait, 1),
        ni: round_to(cpu.nice, 1),
    }
}

fn load_json(load: &LoadAverages) -> [f64; 3] {
    [
        round_to(load.one, 2),
        round_to(load.five, 2),
        round_to(load.fifteen, 2),
    ]
}

/// `[days, hours % 24, minutes % 60]`.
pub fn uptime_parts(secs: u64) -> [u64; 3] {
    [secs / 86_400, secs / 3_600 % 24, secs / 60 % 60]
}

fn netifs_json(interfaces: &[NetInterface]) -> Vec<NetIfJson<'_>> {
    interfaces
        .iter()
        .map(|i| NetIfJson {
            ifname: &i.name,
            ipv4: i.ipv4,
        })
        .collect()
}

fn mem_json(m: &MemoryStats) -> MemJson {
    MemJson {
        total_ram: m.total_ram_kb,
        free_ram: m.free_ram_kb,
        shared_ram: m.shared_ram_kb,
        buffer_ram: m.buffer_ram_kb,
        total_swap: m.total_swap_kb,
        free_swap: m.free_swap_kb,
        total_high: m.total_high_kb,
        free_high: m.free_high_kb,
        mem_unit: m.mem_unit,
    }
}

fn body(route: Route, snap: &Snapshot) -> Body<'_> {
    match route {
        Route::Cpu => Body::Cpu {
            cpu: cpu_json(&snap.cpu),
        },
        Route::Load => Body::Load {
            load: load_json(&snap.load),
        },
        Route::Uptime => Body::Uptime {
            uptime: uptime_parts(snap.memory.uptime_secs),
        },
        Route::Procs => Body::Procs {
            procs: snap.memory.process_count,
        },
        Route::Cores => Body::Cores { cores: snap.cores },
        Route::Net => Body::Net {
            netifs: netifs_json(&snap.interfaces),
        },
        Route::Mem => Body::Mem {
            mem: mem_json(&snap.memory),
        },
        Route::All => Body::All {
            cpu: cpu_json(&snap.cpu),
            load: load_json(&snap.load),
            uptime: uptime_parts(snap.memory.uptime_secs),
            procs: snap.memory.process_count,
            cores: snap.cores,
            netifs: netifs_json(&snap.interfaces),
            mem: mem_json(&snap.memory),
        },
        Route::Unknown => Body::Err { err: 1 },
    }
}

pub fn body_capacity(interface_count: usize) -> usize {
    FIXED_BODY_BYTES + interface_count * MAX_IFACE_ENTRY_BYTES
}

pub fn render(route: Route, snap: &Snapshot) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::with_capacity(body_capacity(snap.interfaces.len()));
    let body = body(route, snap);
    if route == Route::All {
        serde_json::to_writer_pretty(&mut out, &body)?;
    } else {
        serde_json::to_writer(&mut out, &body)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_snapshot() -> Snapshot {
        let mut snap = Snapshot::new(4);
        snap.cpu = CpuUsage {
            user: 12.34,
            nice: 0.0,
            system: 5.56,
            idle: 80.0,
            iowait: 2.11,
        };
        snap.load = LoadAverages {
            one: 0.1,
            five: 0.256,
            fifteen: 0.3,
        };
        snap.memory.uptime_secs = 90_061;
        snap.memory.process_count = 215;
        snap.memory.total_ram_kb = 16_000_000;
        snap.memory.mem_unit = 1;
        snap.interfaces = vec![
            NetInterface {
                name: "lo".to_string(),
                ipv4: Ipv4Addr::LOCALHOST,
            },
            NetInterface {
                name: "eth0".to_string(),
                ipv4: Ipv4Addr::new(10, 1, 2, 3),
            },
        ];
        snap
    }

    fn render_str(route: Route, snap: &Snapshot) -> String {
        String::from_utf8(render(route, snap).unwrap()).unwrap()
    }

    fn request(text: &str) -> Route {
        Request::from_bytes(text.as_bytes()).route()
    }

    #[test]
    fn routes_by_exact_path() {
        assert_eq!(request("GET /cpu HTTP/1.1\r\nHost: x\r\n\r\n"), Route::Cpu);
        assert_eq!(request("GET /load\n"), Route::Load);
        assert_eq!(request("GET /uptime HTTP/1.0"), Route::Uptime);
        assert_eq!(request("GET /procs"), Route::Procs);
        assert_eq!(request("GET /cores"), Route::Cores);
        assert_eq!(request("GET /net?verbose=1 HTTP/1.1"), Route::Net);
        assert_eq!(request("GET /mem"), Route::Mem);
        assert_eq!(request("GET / HTTP/1.1"), Route::All);
    }

    #[test]
    fn unmapped_and_malformed_requests_fall_back() {
        assert_eq!(request("GET /unknown HTTP/1.1"), Route::Unknown);
        assert_eq!(request("GET /cpuinfo"), Route::Unknown);
        assert_eq!(request("GET /cp"), Route::Unknown);
        assert_eq!(request("POST /cpu HTTP/1.1"), Route::Unknown);
        assert_eq!(request("GET"), Route::Unknown);
        assert_eq!(request(""), Route::Unknown);
        assert_eq!(request("\u{fffd}\u{0}"), Route::Unknown);
    }

    #[test]
    fn trims_single_trailing_newline() {
        let req = Request::from_bytes(b"GET /cpu\n\n");
        assert_eq!(req.text, "GET /cpu\n");
        let req = Request::from_bytes(b"GET /cpu\r\n");
        assert_eq!(req.line(), "GET /cpu");
    }

    #[test]
    fn unknown_is_exact_error_object() {
        assert_eq!(render_str(Route::Unknown, &sample_snapshot()), r#"{"err":1}"#);
    }

    #[test]
    fn cpu_shape_and_rounding() {
        assert_eq!(
            render_str(Route::Cpu, &sample_snapshot()),
            r#"{"cpu":{"us":12.3,"sy":5.6,"id":80.0,"wa":2.1,"ni":0.0}}"#
        );
    }

    #[test]
    fn load_shape_and_rounding() {
        assert_eq!(
            render_str(Route::Load, &sample_snapshot()),
            r#"{"load":[0.1,0.26,0.3]}"#
        );
    }

    #[test]
    fn uptime_renders_days_hours_minutes() {
        assert_eq!(uptime_parts(90_061), [1, 1, 1]);
        assert_eq!(uptime_parts(59), [0, 0, 0]);
        assert_eq!(
            render_str(Route::Uptime, &sample_snapshot()),
            r#"{"uptime":[1,1,1]}"#
        );
    }

    #[test]
    fn scalar_shapes() {
        let snap = sample_snapshot();
        assert_eq!(render_str(Route::Procs, &snap), r#"{"procs":215}"#);
        assert_eq!(render_str(Route::Cores, &snap), r#"{"cores":4}"#);
        assert_eq!(render_str(Route::Cores, &snap), render_str(Route::Cores, &snap));
    }

    #[test]
    fn net_shape() {
        assert_eq!(
            render_str(Route::Net, &sample_snapshot()),
            r#"{"netifs":[{"ifname":"lo","ipv4":"127.0.0.1"},{"ifname":"eth0","ipv4":"10.1.2.3"}]}"#
        );
        assert_eq!(render_str(Route::Net, &Snapshot::new(1)), r#"{"netifs":[]}"#);
    }

    #[test]
    fn mem_shape() {
        let v: Value = serde_json::from_slice(&render(Route::Mem, &sample_snapshot()).unwrap()).unwrap();
        assert_eq!(v["mem"]["total_ram"], 16_000_000);
        assert_eq!(v["mem"]["mem_unit"], 1);
    }

    #[test]
    fn aggregate_contains_every_family() {
        let v: Value = serde_json::from_slice(&render(Route::All, &sample_snapshot()).unwrap()).unwrap();
        let obj = v.as_object().unwrap();
        for key in ["cpu", "load", "uptime", "procs", "cores", "netifs", "mem"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(v["cpu"]["us"], 12.3);
        assert_eq!(v["uptime"], serde_json::json!([1, 1, 1]));
        assert_eq!(v["netifs"][1]["ifname"], "eth0");
    }

    #[test]
    fn names_with_quotes_are_escaped() {
        let mut snap = Snapshot::new(1);
        snap.interfaces = vec![NetInterface {
            name: "we\"ird\\".to_string(),
            ipv4: Ipv4Addr::new(1, 2, 3, 4),
        }];
        let v: Value = serde_json::from_slice(&render(Route::Net, &snap).unwrap()).unwrap();
        assert_eq!(v["netifs"][0]["ifname"], "we\"ird\\");
    }

    #[test]
    fn full_interface_list_fits_capacity() {
        let mut snap = Snapshot::new(1);
        snap.interfaces = (0..16)
            .map(|i| NetInterface {
                name: "\u{1}".repeat(MAX_IFNAME_BYTES),
                ipv4: Ipv4Addr::new(255, 255, 255, i),
            })
            .collect();
        let out = render(Route::All, &snap).unwrap();
        assert!(out.len() <= body_capacity(snap.interfaces.len()));
    }
}
