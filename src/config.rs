//! Connection configuration and DSN parsing
//!
//! Supports the DM URL form:
//! - `dm://user:pass@host:port?opt=val&...`
//! - `dm://user:pass@h1:p1,h2:p2?...` (several endpoints)
//! - `dm://user:pass@GROUP?...` (a group defined in the service-name file)
//!
//! Option keys are case-insensitive and underscores are ignored, so
//! `loginMode`, `LOGIN_MODE` and `loginmode` are the same key. The
//! service-name file uses the same keys.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::compress::{CompressAlgorithm, CompressMode};
use crate::constants::{limits, IsolationLevel, Locale};
use crate::error::{Error, Result};
use crate::transport::TlsConfig;

/// Default DM port
pub const DEFAULT_PORT: u16 = 5236;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const DSN_SCHEME: &str = "dm://";

/// One `host:port` endpoint address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
}

impl HostPort {
    /// Create an address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((h, p)) if !h.is_empty() => (
                h.trim_start_matches('[').trim_end_matches(']'),
                p.trim()
                    .parse()
                    .map_err(|_| Error::InvalidConnectionString(format!("invalid port in {s:?}")))?,
            ),
            _ => (s, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(Error::InvalidConnectionString("missing host".to_string()));
        }
        Ok(HostPort::new(host, port))
    }
}

macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident = $code:literal : [$($alias:literal),*] ),* $(,)? }
        default $default:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl $name {
            /// Numeric option code
            pub fn code(&self) -> i32 {
                match self {
                    $( $name::$variant => $code, )*
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let key = s.trim().to_ascii_lowercase().replace('_', "");
                $(
                    if key == stringify!($code) $(|| key == $alias)* {
                        return Ok($name::$variant);
                    }
                )*
                Err(Error::InvalidConnectionString(format!(
                    concat!("invalid ", stringify!($name), " value: {}"),
                    s
                )))
            }
        }
    };
}

coded_enum! {
    /// Preference over endpoint modes when choosing where to log in
    LoginMode {
        /// Prefer primaries, then normal servers, then standbys
        PrimaryFirst = 0: ["primaryfirst"],
        /// Primaries only
        PrimaryOnly = 1: ["primaryonly", "primary"],
        /// Standbys only
        StandbyOnly = 2: ["standbyonly", "standby"],
        /// Prefer standbys
        StandbyFirst = 3: ["standbyfirst"],
        /// Prefer normal (standalone) servers
        NormalFirst = 4: ["normalfirst", "normal"],
    }
    default NormalFirst
}

coded_enum! {
    /// Reconnect policy when the current endpoint fails or recovers
    DoSwitch {
        /// Never switch
        Off = 0: ["off", "false", "no"],
        /// Switch to another endpoint on a broken connection
        On = 1: ["on", "true", "yes"],
        /// Also move back when a preferred endpoint recovers
        WhenEpRecover = 2: ["whenrecover", "whenep", "recover"],
    }
    default Off
}

coded_enum! {
    /// Endpoint traversal strategy
    EpSelector {
        /// Keep the configured order
        HeadFirst = 0: ["headfirst", "head"],
        /// Rotate the starting endpoint on every connect
        WellDistribute = 1: ["welldistribute", "distribute"],
    }
    default HeadFirst
}

coded_enum! {
    /// When LOB contents are pulled from the server
    LobMode {
        /// Read through the LOB handle on demand
        Lazy = 1: ["lazy"],
        /// Read the whole value when the row is materialized
        FetchAll = 2: ["fetchall", "all"],
    }
    default Lazy
}

coded_enum! {
    /// Deployment type of the server group
    ClusterMode {
        /// Standalone or primary/standby group
        Normal = 0: ["normal", "single"],
        /// Shared-storage cluster
        Dsc = 1: ["dsc"],
        /// Data-watch group
        Dw = 2: ["dw"],
        /// Read/write split group
        Rw = 3: ["rw"],
        /// Massively parallel cluster
        Mpp = 4: ["mpp"],
    }
    default Normal
}

coded_enum! {
    /// Execution of multi-row parameter sets
    BatchType {
        /// One batch request carrying every row
        Batch = 1: ["batch"],
        /// One execute per row
        Single = 2: ["single", "row"],
    }
    default Batch
}

/// Connection configuration.
///
/// Build with [`Config::new`] and the `with_*` setters, or parse a DSN.
///
/// ```rust
/// use dm_rs::{Config, LoginMode};
///
/// let config: Config = "dm://SYSDBA:secret@db1:5236,db2:5237?loginMode=1&rwSeparate=true"
///     .parse()
///     .unwrap();
/// assert_eq!(config.endpoints.len(), 2);
/// assert_eq!(config.login_mode, LoginMode::PrimaryOnly);
/// assert!(!config.to_string().contains("secret"));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoints in configured order
    pub endpoints: Vec<HostPort>,
    /// Service-name group the endpoints came from
    pub group: Option<String>,
    /// Username
    pub username: String,
    password: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per read/write socket timeout
    pub socket_timeout: Option<Duration>,
    /// Server-side idle session timeout in seconds (0 = none)
    pub session_timeout: i32,
    /// Encrypt credentials with a negotiated session key
    pub login_encrypt: bool,
    /// Endpoint mode preference
    pub login_mode: LoginMode,
    /// Endpoint traversal strategy
    pub ep_selector: EpSelector,
    /// Deployment type
    pub cluster: ClusterMode,
    /// Outbound compression policy
    pub compress: CompressMode,
    /// Compression algorithm
    pub compress_id: CompressAlgorithm,
    /// Schema to switch to after login
    pub schema: Option<String>,
    /// Compatibility dialect (e.g. `oracle`, `mysql`)
    pub compatible_mode: Option<String>,
    /// Commit after every statement
    pub auto_commit: bool,
    /// Isolation level requested at login
    pub isolation: IsolationLevel,
    /// Open the session read-only
    pub read_only: bool,
    /// Locale for server messages
    pub locale: Locale,
    /// Application name reported to the server
    pub app_name: String,
    /// Row cap for result sets (0 = unlimited)
    pub max_rows: i64,
    /// Rows per fetch window
    pub row_prefetch: i32,
    /// Prefetch buffer in bytes (0 = derive from row size)
    pub buf_prefetch: i32,
    /// LOB read policy
    pub lob_mode: LobMode,
    /// Keep executing batch rows after a failure
    pub continue_batch_on_error: bool,
    /// Multi-row execution mode
    pub batch_type: BatchType,
    /// Stored-procedure batches always go row by row
    pub batch_not_on_call: bool,
    /// Enable the client result cache
    pub en_rs_cache: bool,
    /// Result cache capacity in MiB
    pub rs_cache_size: usize,
    /// Minimum interval between table timestamp checks
    pub rs_refresh_freq: Duration,
    /// Open a standby session for read/write split
    pub rw_separate: bool,
    /// Share of read-only statements sent to the primary (0-100)
    pub rw_percent: u8,
    /// Classify statements automatically by their SQL head
    pub rw_auto_distribute: bool,
    /// Re-run empty standby reads on the primary
    pub rw_ha: bool,
    /// Reconnect policy
    pub do_switch: DoSwitch,
    /// Extra rounds over the endpoint list
    pub switch_times: u32,
    /// Wait between rounds and between recovery checks
    pub switch_interval: Duration,
    /// Reconnect after a broken connection instead of failing it
    pub driver_reconnect: bool,
    /// Restrict MPP execution to the local node
    pub mpp_local: bool,
    /// Client UTC offset in minutes
    pub time_zone: i16,
    /// TLS settings, when TLS certificates were configured
    pub tls: Option<TlsConfig>,
    /// Key of a registered third-party cipher
    pub cipher_path: Option<String>,
    /// Client certificate presented during certificate login
    pub login_cert: Option<String>,
    /// Service-name file to resolve groups from
    pub service_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: vec![HostPort::new("localhost", DEFAULT_PORT)],
            group: None,
            username: "SYSDBA".to_string(),
            password: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: None,
            session_timeout: 0,
            login_encrypt: true,
            login_mode: LoginMode::default(),
            ep_selector: EpSelector::default(),
            cluster: ClusterMode::default(),
            compress: CompressMode::Off,
            compress_id: CompressAlgorithm::Zlib,
            schema: None,
            compatible_mode: None,
            auto_commit: true,
            isolation: IsolationLevel::ReadCommitted,
            read_only: false,
            locale: Locale::default(),
            app_name: String::new(),
            max_rows: 0,
            row_prefetch: limits::DEFAULT_FETCH_SIZE,
            buf_prefetch: 0,
            lob_mode: LobMode::default(),
            continue_batch_on_error: false,
            batch_type: BatchType::default(),
            batch_not_on_call: false,
            en_rs_cache: false,
            rs_cache_size: 20,
            rs_refresh_freq: Duration::from_secs(10),
            rw_separate: false,
            rw_percent: 25,
            rw_auto_distribute: true,
            rw_ha: false,
            do_switch: DoSwitch::default(),
            switch_times: 1,
            switch_interval: Duration::from_millis(1000),
            driver_reconnect: false,
            mpp_local: false,
            time_zone: local_offset_minutes(),
            tls: None,
            cipher_path: None,
            login_cert: None,
            service_file: None,
        }
    }
}

fn local_offset_minutes() -> i16 {
    (chrono::Local::now().offset().local_minus_utc() / 60) as i16
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConnectionString(format!("{key} expects a boolean, got {value:?}"))),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConnectionString(format!("{key} expects a number, got {value:?}")))
}

fn millis(key: &str, value: &str) -> Result<Duration> {
    Ok(Duration::from_millis(parse_num(key, value)?))
}

/// Normalized option key: lowercase, underscores removed
pub(crate) fn option_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('_', "")
}

fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| Error::InvalidConnectionString(format!("bad escape in {s:?}")))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::InvalidConnectionString("credentials are not UTF-8".to_string()))
}

impl Config {
    /// Create a configuration for one endpoint
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            endpoints: vec![HostPort::new(host, port)],
            username: username.to_string(),
            password: password.to_string(),
            ..Default::default()
        }
    }

    /// Add another endpoint
    pub fn with_endpoint(mut self, host: &str, port: u16) -> Self {
        self.endpoints.push(HostPort::new(host, port));
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket read/write timeout
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Set the login mode
    pub fn with_login_mode(mut self, mode: LoginMode) -> Self {
        self.login_mode = mode;
        self
    }

    /// Set compression
    pub fn with_compress(mut self, mode: CompressMode, algorithm: CompressAlgorithm) -> Self {
        self.compress = mode;
        self.compress_id = algorithm;
        self
    }

    /// Enable or disable credential encryption
    pub fn with_login_encrypt(mut self, enabled: bool) -> Self {
        self.login_encrypt = enabled;
        self
    }

    /// Set TLS settings
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Log in with a client certificate when the server asks for one
    pub fn with_login_cert(mut self, path: impl Into<String>) -> Self {
        self.login_cert = Some(path.into());
        self
    }

    /// Enable the result cache with a capacity in MiB
    pub fn with_result_cache(mut self, size_mib: usize) -> Self {
        self.en_rs_cache = true;
        self.rs_cache_size = size_mib;
        self
    }

    /// Enable read/write split
    pub fn with_rw_separate(mut self, percent: u8) -> Self {
        self.rw_separate = true;
        self.rw_percent = percent.min(100);
        self
    }

    /// Enable reconnect on broken connections
    pub fn with_reconnect(mut self, do_switch: DoSwitch) -> Self {
        self.do_switch = do_switch;
        self.driver_reconnect = do_switch != DoSwitch::Off;
        self
    }

    /// Set the schema to use after login
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set autocommit
    pub fn with_auto_commit(mut self, enabled: bool) -> Self {
        self.auto_commit = enabled;
        self
    }

    /// Set the LOB read policy
    pub fn with_lob_mode(mut self, mode: LobMode) -> Self {
        self.lob_mode = mode;
        self
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Set the password
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    /// Set the username
    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = username.into();
    }

    /// Apply one option by key. Unknown keys are ignored.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        let key = option_key(key);
        let value = value.trim().trim_start_matches('(').trim_end_matches(')').trim();
        match key.as_str() {
            "user" | "username" => self.username = value.to_string(),
            "password" => self.password = value.to_string(),
            "compress" => self.compress = value.parse()?,
            "compressid" => {
                self.compress_id = CompressAlgorithm::from_id(parse_num(&key, value)?)
                    .map_err(|_| Error::InvalidConnectionString(format!("invalid compressId: {value}")))?
            }
            "enrscache" => self.en_rs_cache = parse_bool(&key, value)?,
            "rscachesize" => self.rs_cache_size = parse_num(&key, value)?,
            "rsrefreshfreq" => self.rs_refresh_freq = Duration::from_secs(parse_num(&key, value)?),
            "loginmode" => self.login_mode = value.parse()?,
            "loginencrypt" => self.login_encrypt = parse_bool(&key, value)?,
            "epselector" => self.ep_selector = value.parse()?,
            "cluster" => self.cluster = value.parse()?,
            "rwseparate" => self.rw_separate = parse_bool(&key, value)?,
            "rwpercent" => self.rw_percent = parse_num::<u8>(&key, value)?.min(100),
            "rwautodistribute" => self.rw_auto_distribute = parse_bool(&key, value)?,
            "rwha" => self.rw_ha = parse_bool(&key, value)?,
            "doswitch" | "autoreconnect" => {
                self.do_switch = value.parse()?;
                self.driver_reconnect = self.do_switch != DoSwitch::Off;
            }
            "driverreconnect" => self.driver_reconnect = parse_bool(&key, value)?,
            "switchtimes" | "switchtime" => self.switch_times = parse_num(&key, value)?,
            "switchinterval" => self.switch_interval = millis(&key, value)?,
            "sockettimeout" => {
                let d = millis(&key, value)?;
                self.socket_timeout = (!d.is_zero()).then_some(d);
            }
            "connecttimeout" => self.connect_timeout = millis(&key, value)?,
            "sessiontimeout" => self.session_timeout = parse_num(&key, value)?,
            "sslcertpath" => {
                let tls = self.tls.get_or_insert_with(TlsConfig::new);
                tls.client_cert_path = Some(value.to_string());
            }
            "sslkeypath" => {
                let tls = self.tls.get_or_insert_with(TlsConfig::new);
                tls.client_key_path = Some(value.to_string());
            }
            "sslcapath" => {
                let tls = self.tls.take().unwrap_or_default();
                self.tls = Some(tls.with_ca_cert(value));
            }
            "sslkeypassword" => {
                let tls = self.tls.get_or_insert_with(TlsConfig::new);
                tls.key_password = Some(value.to_string());
            }
            "schema" => self.schema = (!value.is_empty()).then(|| value.to_string()),
            "compatiblemode" => self.compatible_mode = (!value.is_empty()).then(|| value.to_string()),
            "autocommit" => self.auto_commit = parse_bool(&key, value)?,
            "isolation" | "isolationlevel" => self.isolation = value.parse()?,
            "readonly" => self.read_only = parse_bool(&key, value)?,
            "language" | "locale" => self.locale = value.parse()?,
            "appname" => self.app_name = value.to_string(),
            "maxrows" => self.max_rows = parse_num(&key, value)?,
            "rowprefetch" | "fetchsize" => self.row_prefetch = parse_num::<i32>(&key, value)?.max(1),
            "bufprefetch" => self.buf_prefetch = parse_num(&key, value)?,
            "lobmode" => self.lob_mode = value.parse()?,
            "continuebatchonerror" => self.continue_batch_on_error = parse_bool(&key, value)?,
            "batchtype" => self.batch_type = value.parse()?,
            "batchnotoncall" => self.batch_not_on_call = parse_bool(&key, value)?,
            "mpplocal" => self.mpp_local = parse_bool(&key, value)?,
            "timezone" => self.time_zone = parse_num(&key, value)?,
            "cipherpath" => self.cipher_path = Some(value.to_string()),
            "logincert" => self.login_cert = Some(value.to_string()),
            "svcconfpath" | "servicefile" => self.service_file = Some(value.to_string()),
            other => tracing::debug!(option = other, "ignoring unknown connection option"),
        }
        Ok(())
    }

    /// Apply a set of options in order
    pub fn apply_options<'a>(&mut self, options: impl IntoIterator<Item = (&'a String, &'a String)>) -> Result<()> {
        for (k, v) in options {
            self.set_option(k, v)?;
        }
        Ok(())
    }

    /// TLS settings, if any were configured
    pub fn tls_config(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// Resolve the group name against a service-name file, replacing the
    /// endpoint list and applying the group's property overrides
    pub fn resolve_group(&mut self, file: &ServiceFile) -> Result<bool> {
        let Some(name) = self.group.clone() else {
            return Ok(false);
        };
        let Some(group) = file.group(&name) else {
            return Ok(false);
        };
        self.endpoints = group.endpoints.clone();
        let mut props: Vec<_> = group.properties.iter().collect();
        props.sort();
        self.apply_options(props)?;
        Ok(true)
    }
}

/// Parse a `dm://` DSN
impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let rest = s
            .strip_prefix(DSN_SCHEME)
            .or_else(|| s.strip_prefix("DM://"))
            .ok_or_else(|| Error::InvalidConnectionString(format!("expected {DSN_SCHEME} prefix")))?;

        let (authority, query) = rest.split_once('?').unwrap_or((rest, ""));
        let authority = authority.trim_end_matches('/');
        let (userinfo, hosts) = match authority.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, authority),
        };
        if hosts.is_empty() {
            return Err(Error::InvalidConnectionString("missing host".to_string()));
        }

        let mut config = Config::default();
        if let Some(userinfo) = userinfo {
            let (user, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));
            config.username = percent_decode(user)?;
            config.password = percent_decode(password)?;
        }

        config.endpoints = hosts
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<HostPort>>>()?;
        if config.endpoints.len() == 1 && !hosts.contains(':') {
            config.group = Some(hosts.to_string());
        }

        // Options applied in DSN order
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        for (k, v) in &pairs {
            config.set_option(k, v)?;
        }
        Ok(config)
    }
}

/// Renders the DSN without the password
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DSN_SCHEME}{}@", self.username)?;
        match &self.group {
            Some(g) => write!(f, "{g}")?,
            None => {
                let hosts: Vec<String> = self.endpoints.iter().map(ToString::to_string).collect();
                write!(f, "{}", hosts.join(","))?;
            }
        }
        write!(f, "?loginMode={}&autoCommit={}", self.login_mode.code(), self.auto_commit)?;
        if self.rw_separate {
            write!(f, "&rwSeparate=true&rwPercent={}", self.rw_percent)?;
        }
        if self.do_switch != DoSwitch::Off {
            write!(f, "&doSwitch={}", self.do_switch.code())?;
        }
        Ok(())
    }
}

// =============================================================================
// Service-name File
// =============================================================================

/// One group of a service-name file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceGroup {
    /// Endpoints in file order
    pub endpoints: Vec<HostPort>,
    /// Properties from the group's `[NAME]` section
    pub properties: HashMap<String, String>,
}

/// Parsed service-name file.
///
/// ```text
/// # global defaults
/// LOGIN_MODE=(1)
/// DMHA=(192.168.0.1:5236,192.168.0.2:5236)
/// [DMHA]
/// SWITCH_TIMES=(3)
/// ```
///
/// A top-level entry whose key is not a known option defines a group; its
/// value is the endpoint list. Keys are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFile {
    /// Global option defaults
    pub globals: HashMap<String, String>,
    groups: HashMap<String, ServiceGroup>,
}

const KNOWN_OPTIONS: &[&str] = &[
    "compress", "compressid", "enrscache", "rscachesize", "rsrefreshfreq", "loginmode", "loginencrypt",
    "epselector", "cluster", "rwseparate", "rwpercent", "rwautodistribute", "rwha", "doswitch",
    "autoreconnect", "driverreconnect", "switchtimes", "switchtime", "switchinterval", "sockettimeout",
    "connecttimeout", "sessiontimeout", "sslcertpath", "sslkeypath", "sslcapath", "sslkeypassword",
    "schema", "compatiblemode", "autocommit", "isolation", "isolationlevel", "readonly", "language",
    "locale", "appname", "maxrows", "rowprefetch", "fetchsize", "bufprefetch", "lobmode",
    "continuebatchonerror", "batchtype", "batchnotoncall", "mpplocal", "timezone", "cipherpath",
    "logincert", "loglevel", "logdir", "logflushfreq", "statenable", "statdir",
];

impl ServiceFile {
    /// Read and parse a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::InvalidConnectionString(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        text.parse()
    }

    /// Look up a group (case-insensitive)
    pub fn group(&self, name: &str) -> Option<&ServiceGroup> {
        self.groups.get(&name.to_ascii_uppercase())
    }

    /// Iterate over group names
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

impl FromStr for ServiceFile {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut file = ServiceFile::default();
        let mut section: Option<String> = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_ascii_uppercase();
                file.groups.entry(name.clone()).or_default();
                section = Some(name);
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::InvalidConnectionString(format!("line {}: expected key=value", lineno + 1))
            })?;
            let value = value.trim().trim_start_matches('(').trim_end_matches(')').trim().to_string();
            let norm = option_key(key);
            match &section {
                Some(group) => {
                    file.groups.entry(group.clone()).or_default().properties.insert(norm, value);
                }
                None if KNOWN_OPTIONS.contains(&norm.as_str()) => {
                    file.globals.insert(norm, value);
                }
                None => {
                    let endpoints = value
                        .split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(str::parse)
                        .collect::<Result<Vec<HostPort>>>()?;
                    file.groups
                        .entry(key.trim().to_ascii_uppercase())
                        .or_default()
                        .endpoints = endpoints;
                }
            }
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_host() {
        let config: Config = "dm://SYSDBA:pw@db.example:5237?autoCommit=false".parse().unwrap();
        assert_eq!(config.endpoints, vec![HostPort::new("db.example", 5237)]);
        assert_eq!(config.username, "SYSDBA");
        assert_eq!(config.password(), "pw");
        assert!(!config.auto_commit);
        assert!(config.group.is_none());
    }

    #[test]
    fn test_parse_multi_host_and_options() {
        let config: Config = "dm://u:p@h1:1,h2:2?LOGIN_MODE=3&switchTimes=4&switchInterval=250&socketTimeout=1500"
            .parse()
            .unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.login_mode, LoginMode::StandbyFirst);
        assert_eq!(config.switch_times, 4);
        assert_eq!(config.switch_interval, Duration::from_millis(250));
        assert_eq!(config.socket_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_group_name() {
        let config: Config = "dm://u:p@DMHA".parse().unwrap();
        assert_eq!(config.group.as_deref(), Some("DMHA"));
        assert_eq!(config.endpoints[0].port, DEFAULT_PORT);
    }

    #[test]
    fn test_percent_encoded_password() {
        let config: Config = "dm://u:p%40ss%3A1@h:1".parse().unwrap();
        assert_eq!(config.password(), "p@ss:1");
    }

    #[test]
    fn test_parse_errors() {
        assert!("mysql://h".parse::<Config>().is_err());
        assert!("dm://u:p@".parse::<Config>().is_err());
        assert!("dm://h:notaport".parse::<Config>().is_err());
        assert!("dm://h:1?loginMode=9".parse::<Config>().is_err());
        assert!("dm://h:1?autoCommit=maybe".parse::<Config>().is_err());
    }

    #[test]
    fn test_enum_codes() {
        assert_eq!("0".parse::<LoginMode>().unwrap(), LoginMode::PrimaryFirst);
        assert_eq!("primary_only".parse::<LoginMode>().unwrap(), LoginMode::PrimaryOnly);
        assert_eq!(LoginMode::default(), LoginMode::NormalFirst);
        assert_eq!("2".parse::<DoSwitch>().unwrap(), DoSwitch::WhenEpRecover);
        assert_eq!("fetch_all".parse::<LobMode>().unwrap(), LobMode::FetchAll);
        assert_eq!(EpSelector::WellDistribute.code(), 1);
    }

    #[test]
    fn test_display_hides_password() {
        let config = Config::new("h", 1, "SYSDBA", "topsecret").with_rw_separate(40);
        let s = config.to_string();
        assert!(s.starts_with("dm://SYSDBA@h:1?"));
        assert!(s.contains("rwPercent=40"));
        assert!(!s.contains("topsecret"));
    }

    #[test]
    fn test_builder_pattern() {
        let config = Config::new("a", 1, "u", "p")
            .with_endpoint("b", 2)
            .with_connect_timeout(Duration::from_secs(3))
            .with_reconnect(DoSwitch::On)
            .with_result_cache(8);
        assert_eq!(config.endpoints.len(), 2);
        assert!(config.driver_reconnect);
        assert!(config.en_rs_cache);
        assert_eq!(config.rs_cache_size, 8);
    }

    #[test]
    fn test_service_file() {
        let text = "\
# defaults
LOGIN_MODE=(1)
dmha=(10.0.0.1:5236, 10.0.0.2:5237)
[DMHA]
SWITCH_TIMES=(3)
RW_SEPARATE=(1)
";
        let file: ServiceFile = text.parse().unwrap();
        assert_eq!(file.globals.get("loginmode").map(String::as_str), Some("1"));
        let group = file.group("DmHa").unwrap();
        assert_eq!(group.endpoints, vec![HostPort::new("10.0.0.1", 5236), HostPort::new("10.0.0.2", 5237)]);

        let mut config: Config = "dm://u:p@DMHA".parse().unwrap();
        assert!(config.resolve_group(&file).unwrap());
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.switch_times, 3);
        assert!(config.rw_separate);
    }

    #[test]
    fn test_service_file_bad_line() {
        assert!("[G]\nnot a pair".parse::<ServiceFile>().is_err());
    }
}
