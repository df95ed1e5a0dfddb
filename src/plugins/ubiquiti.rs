use super::*;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

const RUNNING_CONFIG: &str = "show running-config interface";
const DESCRIPTIONS: &str = "show interfaces description";

static INTERFACES: Lazy<Path> =
    Lazy::new(|| schema_path("/openconfig-interfaces:interfaces/interface"));
static INTERFACE_CONFIG: Lazy<Path> =
    Lazy::new(|| schema_path("/openconfig-interfaces:interfaces/interface/config"));
static INTERFACE_STATE: Lazy<Path> =
    Lazy::new(|| schema_path("/openconfig-interfaces:interfaces/interface/state"));
static INTERFACE_COUNTERS: Lazy<Path> =
    Lazy::new(|| schema_path("/openconfig-interfaces:interfaces/interface/state/counters"));
static SUBINTERFACES: Lazy<Path> = Lazy::new(|| {
    schema_path("/openconfig-interfaces:interfaces/interface/subinterfaces/subinterface")
});
static SUBINTERFACE_CONFIG: Lazy<Path> = Lazy::new(|| {
    schema_path("/openconfig-interfaces:interfaces/interface/subinterfaces/subinterface/config")
});
static ADDRESSES: Lazy<Path> = Lazy::new(|| {
    schema_path(
        "/openconfig-interfaces:interfaces/interface/subinterfaces/subinterface/openconfig-if-ip:ipv4/addresses/address",
    )
});
static ADDRESS_CONFIG: Lazy<Path> = Lazy::new(|| ADDRESSES.child(crate::datastore::Segment::new("config")));
static ADDRESS_STATE: Lazy<Path> = Lazy::new(|| ADDRESSES.child(crate::datastore::Segment::new("state")));
static SWITCHED_VLAN_CONFIG: Lazy<Path> = Lazy::new(|| {
    schema_path(
        "/openconfig-interfaces:interfaces/interface/openconfig-if-ethernet:ethernet/openconfig-vlan:switched-vlan/config",
    )
});
static POE_CONFIG: Lazy<Path> = Lazy::new(|| {
    schema_path(
        "/openconfig-interfaces:interfaces/interface/openconfig-if-ethernet:ethernet/openconfig-if-poe:poe/config",
    )
});

static MTU: Lazy<Regex> = Lazy::new(|| match Regex::new(r"(?m)^\s*mtu\s+(\d+)\s*$") {
    Ok(re) => re,
    Err(err) => panic!("invalid mtu regex: {err}"),
});

static DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^\s*description\s+'?(.+?)'?\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid description regex: {err}"),
    });

static SHUTDOWN: Lazy<Regex> = Lazy::new(|| match Regex::new(r"(?m)^\s*shutdown\s*$") {
    Ok(re) => re,
    Err(err) => panic!("invalid shutdown regex: {err}"),
});

static INTERFACE: Lazy<Regex> = Lazy::new(|| match Regex::new(r"(?m)^\s*interface\s+(.+?)\s*$") {
    Ok(re) => re,
    Err(err) => panic!("invalid interface regex: {err}"),
});

static ETHERNET_NAME: Lazy<Regex> = Lazy::new(|| match Regex::new(r"^\d+/\d+$") {
    Ok(re) => re,
    Err(err) => panic!("invalid ethernet name regex: {err}"),
});

static DESCRIPTION_ROW: Lazy<Regex> = Lazy::new(|| match Regex::new(r"^(\S+)\s+(\S+)\s+(\S+)\s*(.*)$") {
    Ok(re) => re,
    Err(err) => panic!("invalid description row regex: {err}"),
});

static VLAN_MODE: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^\s*switchport mode (trunk|access)") {
        Ok(re) => re,
        Err(err) => panic!("invalid vlan mode regex: {err}"),
    });

static ACCESS_VLAN: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^\s*switchport access vlan (\d+)") {
        Ok(re) => re,
        Err(err) => panic!("invalid access vlan regex: {err}"),
    });

static TRUNK_VLANS: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^\s*switchport trunk allowed vlan (.+?)\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid trunk vlan regex: {err}"),
    });

static VLAN_ID: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\d+") {
    Ok(re) => re,
    Err(err) => panic!("invalid vlan id regex: {err}"),
});

static IP_ADDRESS: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^\s*ip address (\S+) (\S+)") {
        Ok(re) => re,
        Err(err) => panic!("invalid ip address regex: {err}"),
    });

static REJECTED: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^\s*(% ?(?:Invalid|Incomplete|Ambiguous).*|Error:.*)$") {
        Ok(re) => re,
        Err(err) => panic!("invalid rejection regex: {err}"),
    });

/// Counter leaves and the `show interface ethernet` line each one comes from.
static COUNTERS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("in-octets", r"Total Packets Received \(Octets\).*?(\d+)"),
        ("in-unicast-pkts", r"Unicast Packets Received.*?(\d+)"),
        ("in-multicast-pkts", r"Multicast Packets Received.*?(\d+)"),
        ("in-broadcast-pkts", r"Broadcast Packets Received.*?(\d+)"),
        ("in-discards", r"Receive Packets Discarded.*?(\d+)"),
        ("in-errors", r"Total Packets Received with MAC Errors.*?(\d+)"),
        ("out-octets", r"Total Packets Transmitted \(Octets\).*?(\d+)"),
        ("out-unicast-pkts", r"Unicast Packets Transmitted.*?(\d+)"),
        ("out-multicast-pkts", r"Multicast Packets Transmitted.*?(\d+)"),
        ("out-broadcast-pkts", r"Broadcast Packets Transmitted.*?(\d+)"),
        ("out-discards", r"Transmit Packets Discarded.*?(\d+)"),
        ("out-errors", r"Total Transmit Errors.*?(\d+)"),
    ]
    .into_iter()
    .map(|(leaf, pattern)| match Regex::new(pattern) {
        Ok(re) => (leaf, re),
        Err(err) => panic!("invalid {leaf} counter regex: {err}"),
    })
    .collect()
});

const ETHERNET_TYPE: &str = "iana-if-type:ethernetCsmacd";

/// IANA interface type for the `interface ...` declaration of `name`.
fn interface_type(declared: Option<&str>, name: &str) -> &'static str {
    let declared = declared.unwrap_or_default();
    if declared.starts_with("lag") {
        "iana-if-type:ieee8023adLag"
    } else if declared.starts_with("vlan") {
        "iana-if-type:l3ipvlan"
    } else if ETHERNET_NAME.is_match(name) {
        ETHERNET_TYPE
    } else {
        "iana-if-type:other"
    }
}

fn is_ethernet(running_config: &str, name: &str) -> bool {
    interface_type(capture(running_config, &INTERFACE), name) == ETHERNET_TYPE
}

/// Prefix length of a dotted netmask.
fn prefix_length(netmask: &str) -> Option<u8> {
    let mask: Ipv4Addr = netmask.parse().ok()?;
    u8::try_from(u32::from(mask).count_ones()).ok()
}

async fn running_config(device: &DeviceAccess, name: &str) -> anyhow::Result<String> {
    Ok(device.read(format!("{RUNNING_CONFIG} {name}")).await?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DescriptionRow {
    name: String,
    admin: String,
    link: String,
    description: String,
}

/// Rows of `show interfaces description`, header lines skipped.
fn description_rows(output: &str) -> Vec<DescriptionRow> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines
        .iter()
        .position(|line| {
            let line = line.trim();
            line.contains('-') && line.chars().all(|c| c == '-' || c.is_whitespace())
        })
        .map_or(0, |separator| separator + 1);
    lines[start..]
        .iter()
        .filter_map(|line| {
            let captures = DESCRIPTION_ROW.captures(line.trim_end())?;
            if &captures[1] == "Interface" {
                return None;
            }
            Some(DescriptionRow {
                name: captures[1].to_string(),
                admin: captures[2].to_string(),
                link: captures[3].to_string(),
                description: captures[4].trim().to_string(),
            })
        })
        .collect()
}

/// `/interfaces/interface/config` of one interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InterfaceConfig {
    pub name: String,
    pub mtu: Option<u16>,
    pub description: Option<String>,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            mtu: None,
            description: None,
            enabled: true,
            kind: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperStatus {
    Up,
    Down,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InterfaceState {
    pub name: String,
    pub mtu: Option<u16>,
    pub description: Option<String>,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub admin_status: Option<AdminStatus>,
    pub oper_status: Option<OperStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VlanMode {
    Access,
    Trunk,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SwitchedVlanConfig {
    interface_mode: Option<VlanMode>,
    access_vlan: Option<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    trunk_vlans: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
struct AddressConfig {
    ip: String,
    prefix_length: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
struct AddressState {
    ip: String,
    prefix_length: Option<u8>,
    origin: &'static str,
}

struct InterfaceList;

#[async_trait]
impl ListReader for InterfaceList {
    async fn read_keys(&self, _path: &Path, device: &DeviceAccess) -> anyhow::Result<Vec<Value>> {
        let output = device.read(DESCRIPTIONS).await?;
        Ok(description_rows(&output)
            .into_iter()
            .map(|row| json!({ "name": row.name }))
            .collect())
    }
}

struct InterfaceConfigReader;

#[async_trait]
impl Reader for InterfaceConfigReader {
    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Value> {
        let name = path_key(path, "interface", "name")?;
        let output = running_config(device, name).await?;

        let mut config = Map::new();
        config.insert("name".to_string(), json!(name));
        if let Some(mtu) = capture(&output, &MTU).and_then(|mtu| mtu.parse::<u16>().ok()) {
            config.insert("mtu".to_string(), json!(mtu));
        }
        if let Some(description) = capture(&output, &DESCRIPTION) {
            config.insert("description".to_string(), json!(description));
        }
        config.insert("enabled".to_string(), json!(!SHUTDOWN.is_match(&output)));
        if let Some(declared) = capture(&output, &INTERFACE) {
            config.insert("type".to_string(), json!(interface_type(Some(declared), name)));
        }
        Ok(Value::Object(config))
    }
}

struct InterfaceStateReader;

#[async_trait]
impl BindingReader for InterfaceStateReader {
    type Output = InterfaceState;

    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<InterfaceState> {
        let name = path_key(path, "interface", "name")?;
        let output = running_config(device, name).await?;
        let descriptions = device.read(DESCRIPTIONS).await?;
        let row = description_rows(&descriptions)
            .into_iter()
            .find(|row| row.name == name);

        Ok(InterfaceState {
            name: name.to_string(),
            mtu: capture(&output, &MTU).and_then(|mtu| mtu.parse().ok()),
            description: row
                .as_ref()
                .map(|row| row.description.clone())
                .filter(|description| !description.is_empty()),
            enabled: !SHUTDOWN.is_match(&output),
            kind: interface_type(capture(&output, &INTERFACE), name).to_string(),
            admin_status: row.as_ref().and_then(|row| match row.admin.as_str() {
                "Enable" => Some(AdminStatus::Up),
                "Disable" => Some(AdminStatus::Down),
                _ => None,
            }),
            oper_status: row.as_ref().map(|row| match row.link.as_str() {
                "Up" => OperStatus::Up,
                "Down" => OperStatus::Down,
                _ => OperStatus::Unknown,
            }),
        })
    }
}

struct CountersReader;

#[async_trait]
impl BindingReader for CountersReader {
    type Output = BTreeMap<&'static str, u64>;

    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Self::Output> {
        let name = path_key(path, "interface", "name")?;
        let output = running_config(device, name).await?;
        if !is_ethernet(&output, name) {
            return Ok(BTreeMap::new());
        }
        let output = device.read(format!("show interface ethernet {name}")).await?;
        Ok(COUNTERS
            .iter()
            .filter_map(|(leaf, regex)| {
                let value = capture(&output, regex)?.parse().ok()?;
                Some((*leaf, value))
            })
            .collect())
    }
}

/// Only the logical subinterface 0 exists.
struct SubinterfaceList;

#[async_trait]
impl ListReader for SubinterfaceList {
    async fn read_keys(&self, _path: &Path, _device: &DeviceAccess) -> anyhow::Result<Vec<Value>> {
        Ok(vec![json!({ "index": 0 })])
    }
}

struct SubinterfaceConfigReader;

#[async_trait]
impl Reader for SubinterfaceConfigReader {
    async fn read(&self, path: &Path, _device: &DeviceAccess) -> anyhow::Result<Value> {
        let index: u32 = path_key(path, "subinterface", "index")?
            .parse()
            .context("subinterface index is not a number")?;
        Ok(json!({ "index": index }))
    }
}

struct AddressList;

#[async_trait]
impl ListReader for AddressList {
    async fn read_keys(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<Vec<Value>> {
        let name = path_key(path, "interface", "name")?;
        let output = running_config(device, name).await?;
        Ok(IP_ADDRESS
            .captures_iter(&output)
            .map(|captures| json!({ "ip": &captures[1] }))
            .collect())
    }
}

async fn address_prefix(path: &Path, device: &DeviceAccess) -> anyhow::Result<(String, Option<u8>)> {
    let name = path_key(path, "interface", "name")?;
    let ip = path_key(path, "address", "ip")?;
    let output = running_config(device, name).await?;
    let prefix = IP_ADDRESS
        .captures_iter(&output)
        .find(|captures| &captures[1] == ip)
        .and_then(|captures| prefix_length(&captures[2]));
    Ok((ip.to_string(), prefix))
}

struct AddressConfigReader;

#[async_trait]
impl BindingReader for AddressConfigReader {
    type Output = AddressConfig;

    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<AddressConfig> {
        let (ip, prefix_length) = address_prefix(path, device).await?;
        Ok(AddressConfig { ip, prefix_length })
    }
}

struct AddressStateReader;

#[async_trait]
impl BindingReader for AddressStateReader {
    type Output = AddressState;

    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<AddressState> {
        let (ip, prefix_length) = address_prefix(path, device).await?;
        // only static addresses are configured through this CLI
        Ok(AddressState {
            ip,
            prefix_length,
            origin: "STATIC",
        })
    }
}

struct SwitchedVlanReader;

#[async_trait]
impl BindingReader for SwitchedVlanReader {
    type Output = SwitchedVlanConfig;

    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<SwitchedVlanConfig> {
        let name = path_key(path, "interface", "name")?;
        let output = running_config(device, name).await?;

        let mut config = SwitchedVlanConfig {
            interface_mode: capture(&output, &VLAN_MODE).map(|mode| match mode {
                "trunk" => VlanMode::Trunk,
                _ => VlanMode::Access,
            }),
            ..SwitchedVlanConfig::default()
        };
        if let Some(vlan) = capture(&output, &ACCESS_VLAN) {
            config.access_vlan = vlan.parse().ok();
            config.interface_mode = Some(VlanMode::Access);
        }
        // TODO: expand ranges and the "all"/"except" forms of the allowed list
        if let Some(allowed) = capture(&output, &TRUNK_VLANS) {
            config.trunk_vlans = VLAN_ID
                .find_iter(allowed)
                .filter_map(|vlan| vlan.as_str().parse().ok())
                .collect();
            config.interface_mode = Some(VlanMode::Trunk);
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct PoeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

struct PoeReader;

#[async_trait]
impl BindingReader for PoeReader {
    type Output = PoeConfig;

    async fn read(&self, path: &Path, device: &DeviceAccess) -> anyhow::Result<PoeConfig> {
        let name = path_key(path, "interface", "name")?;
        let output = running_config(device, name).await?;
        let enabled = is_ethernet(&output, name).then(|| !output.contains("poe opmode shutdown"));
        Ok(PoeConfig { enabled })
    }
}

struct InterfaceConfigWriter;

#[async_trait]
impl BindingWriter for InterfaceConfigWriter {
    type Input = InterfaceConfig;

    async fn create(&self, path: &Path, _after: &InterfaceConfig, _device: &DeviceAccess) -> anyhow::Result<()> {
        bail!("interface creation is not supported yet, called for {path}")
    }

    async fn update(
        &self,
        path: &Path,
        _before: &InterfaceConfig,
        after: &InterfaceConfig,
        device: &DeviceAccess,
    ) -> anyhow::Result<()> {
        let name = if after.name.is_empty() {
            path_key(path, "interface", "name")?
        } else {
            after.name.as_str()
        };
        let shutdown = if after.enabled { "no shutdown" } else { "shutdown" };
        let output = device
            .write(format!("configure\ninterface {name}\n{shutdown}\nend\n"))
            .await?;
        if let Some(rejected) = REJECTED.find(&output) {
            bail!("device rejected {shutdown} on {name}: {}", rejected.as_str().trim());
        }
        Ok(())
    }

    async fn remove(&self, path: &Path, _before: &InterfaceConfig, _device: &DeviceAccess) -> anyhow::Result<()> {
        bail!("interface deletion is not supported yet, called for {path}")
    }
}

/// Interfaces of Ubiquiti EdgeSwitch devices, any firmware version.
pub struct UbiquitiInterfacePlugin;

impl Plugin for UbiquitiInterfacePlugin {
    fn device_type(&self) -> DeviceType {
        DeviceType::new("ubiquiti", "*")
    }

    fn provide_readers(&self, registry: &mut ReaderRegistry) {
        registry
            .add_list(INTERFACES.clone(), InterfaceList)
            .add(INTERFACE_CONFIG.clone(), InterfaceConfigReader)
            .add_binding(INTERFACE_STATE.clone(), InterfaceStateReader)
            .add_binding(INTERFACE_COUNTERS.clone(), CountersReader)
            .add_list(SUBINTERFACES.clone(), SubinterfaceList)
            .add(SUBINTERFACE_CONFIG.clone(), SubinterfaceConfigReader)
            .add_list(ADDRESSES.clone(), AddressList)
            .add_binding(ADDRESS_CONFIG.clone(), AddressConfigReader)
            .add_binding(ADDRESS_STATE.clone(), AddressStateReader)
            .add_binding(SWITCHED_VLAN_CONFIG.clone(), SwitchedVlanReader)
            .add_binding(POE_CONFIG.clone(), PoeReader);
    }

    fn provide_writers(&self, registry: &mut WriterRegistry) {
        registry.add_binding(INTERFACE_CONFIG.clone(), InterfaceConfigWriter, false);
    }
}
