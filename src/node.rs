//! Node (storage element) table: types, parsing from `mainnodelist.conf`
//! records, and the registry operations over them (spec section 4.1).

use std::collections::HashMap;

use crate::config::{parse_lines, split_records, Record};
use crate::error::DigsError;

/// Which concrete backend a node's `type` key selects (dispatched in C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Globus,
    Srm,
    Omero,
}

impl NodeType {
    pub fn parse(s: &str) -> Result<Self, DigsError> {
        match s {
            "globus" => Ok(NodeType::Globus),
            "srm" => Ok(NodeType::Srm),
            "omero" => Ok(NodeType::Omero),
            other => Err(DigsError::invariant(format!("unrecognized node type '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Globus => "globus",
            NodeType::Srm => "srm",
            NodeType::Omero => "omero",
        }
    }
}

/// One physical disk on a node, with its quota in kB.
#[derive(Debug, Clone, PartialEq)]
pub struct Disk {
    pub index: usize,
    pub quota_kb: i64,
}

/// Per-node timeouts, in seconds (spec section 4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub job: f64,
    pub ftp: f64,
    pub copy: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            job: crate::buildcfg::DEFAULT_JOB_TIMEOUT_SECS,
            ftp: crate::buildcfg::DEFAULT_FTP_TIMEOUT_SECS,
            copy: crate::buildcfg::DEFAULT_COPY_TIMEOUT_SECS,
        }
    }
}

/// A storage element entry in the node table.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub site: String,
    pub path: String,
    pub inbox: String,
    pub node_type: NodeType,
    pub disks: Vec<Disk>,
    pub free_space_kb: i64,
    pub timeouts: Timeouts,
    pub extra_rsl: Option<String>,
    pub extra_jss_contact: Option<String>,
    pub gpfs: bool,
    pub properties: HashMap<String, String>,
}

const KNOWN_KEYS: &[&str] = &[
    "node", "site", "path", "type", "inbox", "disk", "extrarsl", "extrajsscontact",
    "jobtimeout", "ftptimeout", "copytimeout", "gpfs",
];

fn is_disk_key(key: &str) -> bool {
    key.starts_with("data") && key["data".len()..].chars().all(|c| c.is_ascii_digit())
}

impl Node {
    /// Builds a `Node` from one `node=` record, applying the required/
    /// optional key rules of spec section 4.1 and logging a warning for
    /// any key not consumed by a known field.
    pub fn from_record(rec: &Record) -> Result<Self, DigsError> {
        let name = rec
            .get("node")
            .ok_or_else(|| DigsError::invariant("node record missing 'node' key"))?
            .to_string();
        let site = rec
            .get("site")
            .ok_or_else(|| DigsError::invariant(format!("node '{name}' missing 'site'")))?
            .to_string();
        let path = rec
            .get("path")
            .ok_or_else(|| DigsError::invariant(format!("node '{name}' missing 'path'")))?
            .to_string();
        if path.is_empty() {
            return Err(DigsError::invariant(format!("node '{name}' has empty 'path'")));
        }
        let node_type = NodeType::parse(
            rec.get("type")
                .ok_or_else(|| DigsError::invariant(format!("node '{name}' missing 'type'")))?,
        )?;

        let mut disks = Vec::new();
        for (key, value) in disk_entries(rec) {
            disks.push(Disk {
                index: key,
                quota_kb: value.parse().unwrap_or(0),
            });
        }
        if disks.is_empty() || disks.iter().all(|d| d.quota_kb <= 0) {
            return Err(DigsError::invariant(format!(
                "node '{name}' needs at least one disk with positive quota"
            )));
        }

        let inbox = rec
            .get("inbox")
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{path}/inbox"));

        let mut properties = HashMap::new();
        for key in rec.unknown_keys(KNOWN_KEYS) {
            if is_disk_key(key) {
                continue;
            }
            if let Some(value) = rec.get(key) {
                log::warn!("node '{name}': unknown config key '{key}', storing in properties");
                properties.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Node {
            name,
            site,
            path,
            inbox,
            node_type,
            free_space_kb: rec.get_int("disk", disks.iter().map(|d| d.quota_kb).sum()),
            timeouts: Timeouts {
                job: rec.get_float("jobtimeout", Timeouts::default().job),
                ftp: rec.get_float("ftptimeout", Timeouts::default().ftp),
                copy: rec.get_float("copytimeout", Timeouts::default().copy),
            },
            extra_rsl: rec.get("extrarsl").map(str::to_string),
            extra_jss_contact: rec.get("extrajsscontact").map(str::to_string),
            gpfs: rec.get_bool("gpfs", false),
            disks,
            properties,
        })
    }
}

fn disk_entries(rec: &Record) -> Vec<(usize, String)> {
    // dataN keys are indexed disks; order is not guaranteed by HashMap
    // iteration so we discover indices up to a generous bound instead.
    let mut out = Vec::new();
    for n in 0..128 {
        let key = format!("data{n}");
        if let Some(v) = rec.get(&key) {
            out.push((n, v.to_string()));
        }
    }
    out
}

/// Parses the full `mainnodelist.conf` contents into a list of nodes.
pub fn parse_node_list(contents: &str) -> Result<Vec<Node>, DigsError> {
    let lines = parse_lines(contents);
    let records = split_records(&lines, "node");
    records
        .iter()
        .map(|lines| Record::from_lines(lines))
        .map(|rec| Node::from_record(&rec))
        .collect()
}

/// Serializes the node table back to `mainnodelist.conf` format.
pub fn serialize_node_list(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        out.push_str(&format!("node={}\n", node.name));
        out.push_str(&format!("site={}\n", node.site));
        out.push_str(&format!("path={}\n", node.path));
        out.push_str(&format!("type={}\n", node.node_type.as_str()));
        out.push_str(&format!("inbox={}\n", node.inbox));
        for disk in &node.disks {
            out.push_str(&format!("data{}={}\n", disk.index, disk.quota_kb));
        }
        out.push_str(&format!("disk={}\n", node.free_space_kb));
        out.push_str(&format!("jobtimeout={}\n", node.timeouts.job));
        out.push_str(&format!("ftptimeout={}\n", node.timeouts.ftp));
        out.push_str(&format!("copytimeout={}\n", node.timeouts.copy));
        if let Some(rsl) = &node.extra_rsl {
            out.push_str(&format!("extrarsl={rsl}\n"));
        }
        if let Some(jss) = &node.extra_jss_contact {
            out.push_str(&format!("extrajsscontact={jss}\n"));
        }
        out.push_str(&format!("gpfs={}\n", if node.gpfs { 1 } else { 0 }));
        for (k, v) in &node.properties {
            out.push_str(&format!("{k}={v}\n"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
node=n1.example.org
site=siteA
path=/data/grid
type=globus
data1=1000000
disk=1000000

node=n2.example.org
site=siteB
path=/data/grid2
type=srm
data1=500000
data2=500000
inbox=/data/grid2/staging
bogus=whatever
";

    #[test]
    fn parses_two_node_records() {
        let nodes = parse_node_list(SAMPLE).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "n1.example.org");
        assert_eq!(nodes[0].node_type, NodeType::Globus);
        assert_eq!(nodes[0].disks.len(), 1);
        assert_eq!(nodes[1].disks.len(), 2);
        assert_eq!(nodes[1].inbox, "/data/grid2/staging");
        assert_eq!(
            nodes[1].properties.get("bogus").map(String::as_str),
            Some("whatever")
        );
    }

    #[test]
    fn default_inbox_is_under_path() {
        let nodes = parse_node_list(SAMPLE).unwrap();
        assert_eq!(nodes[0].inbox, "/data/grid/inbox");
    }

    #[test]
    fn missing_required_key_is_invariant_error() {
        let bad = "node=n1\nsite=siteA\ntype=globus\ndata1=10\n";
        let err = parse_node_list(bad).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Invariant);
    }

    #[test]
    fn missing_positive_disk_quota_is_rejected() {
        let bad = "node=n1\nsite=siteA\npath=/x\ntype=globus\ndata1=0\n";
        assert!(parse_node_list(bad).is_err());
    }

    #[test]
    fn serialize_then_parse_round_trips_core_fields() {
        let nodes = parse_node_list(SAMPLE).unwrap();
        let text = serialize_node_list(&nodes);
        let reparsed = parse_node_list(&text).unwrap();
        assert_eq!(reparsed.len(), nodes.len());
        assert_eq!(reparsed[0].name, nodes[0].name);
        assert_eq!(reparsed[1].disks.len(), nodes[1].disks.len());
    }
}
