//! `geoip`: IP 주소 필드를 MaxMind City 데이터베이스로 조회해 위치 정보를 씁니다.
//!
//! 조회 결과는 입력 문자열을 키로 LRU 캐시에 보관합니다 (실패 결과 포함).
//! 캐시에 없을 때마다 데이터베이스 파일의 수정 시각을 확인하고, 바뀌었으면
//! 다시 열고 캐시를 비웁니다. 도시 정보가 없는 주소는 이벤트를 바꾸지 않습니다.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use lru::LruCache;
use maxminddb::Reader;
use serde::Deserialize;

use logforge_core::{Event, Map, Value};

use super::{Action, ActionError, ArgumentKind, ArgumentSpec, Arguments, resolve_string};

static ARGUMENTS: [ArgumentSpec; 3] = [
    ArgumentSpec::required("field", ArgumentKind::String),
    ArgumentSpec::optional("database", ArgumentKind::String).literal_only(),
    ArgumentSpec::optional("target", ArgumentKind::String),
];

const FIELD: usize = 0;
const DATABASE: usize = 1;
const TARGET: usize = 2;

const DEFAULT_TARGET: &str = "source[geo]";
const CACHE_SIZE: usize = 1000;
const LANGUAGE: &str = "en";

/// City 데이터베이스 레코드 중 사용하는 부분
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct CityRecord {
    city: Option<Place>,
    continent: Option<Place>,
    country: Option<Place>,
    location: Option<Location>,
    postal: Option<Postal>,
    #[serde(default)]
    subdivisions: Vec<Place>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Place {
    geoname_id: Option<u32>,
    iso_code: Option<String>,
    #[serde(default)]
    names: BTreeMap<String, String>,
}

impl Place {
    fn name(&self) -> Option<&str> {
        self.names.get(LANGUAGE).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Location {
    latitude: Option<f64>,
    longitude: Option<f64>,
    time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Postal {
    code: Option<String>,
}

/// 캐시되는 조회 실패
#[derive(Debug, Clone, PartialEq, Eq)]
enum LookupError {
    /// 입력이 IP 주소가 아님
    InvalidAddress,
    /// 데이터베이스 조회 오류
    Failed(String),
}

type Lookup = Result<Option<CityRecord>, LookupError>;

/// 열린 데이터베이스와 열었을 때의 파일 수정 시각
struct Database {
    path: PathBuf,
    reader: Arc<Reader<Vec<u8>>>,
    modified: Option<SystemTime>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

impl Database {
    fn open(path: &Path) -> Result<Self, String> {
        let modified = std::fs::metadata(path)
            .map_err(|e| {
                format!(
                    "GeoIP database file '{}' is not accessible: {e}",
                    path.display()
                )
            })?
            .modified()
            .ok();
        let reader = Reader::open_readfile(path)
            .map_err(|e| format!("Failed to initialise GeoIP: {e}"))?;
        Ok(Self {
            path: path.to_owned(),
            reader: Arc::new(reader),
            modified,
        })
    }

    /// 파일이 바뀌었으면 다시 엽니다. 다시 열었으면 `true`.
    fn refresh(&mut self) -> bool {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to check GeoIP database");
                return false;
            }
        };
        if self.modified.is_some_and(|previous| modified <= previous) {
            return false;
        }
        match Self::open(&self.path) {
            Ok(reopened) => {
                tracing::info!(path = %self.path.display(), "reopened updated GeoIP database");
                *self = reopened;
                true
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to reopen GeoIP database");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct GeoIpAction {
    default_database: Option<PathBuf>,
    database: Option<Mutex<Database>>,
    cache: Mutex<LruCache<String, Lookup>>,
}

impl GeoIpAction {
    /// `default_database`는 `database` 인자가 없을 때 사용합니다.
    pub fn new(default_database: Option<PathBuf>) -> Self {
        Self {
            default_database,
            database: None,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// 캐시를 먼저 보고, 없으면 주소를 해석해 `query`로 조회한 뒤 결과를 캐시합니다.
    /// IP 주소가 아닌 입력도 실패 결과로 캐시합니다.
    fn cached_lookup<F>(&self, raw: &str, query: F) -> Lookup
    where
        F: FnOnce(IpAddr) -> Result<Option<CityRecord>, String>,
    {
        if let Some(cached) = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(raw) {
            return cached.clone();
        }
        let result = match raw.parse::<IpAddr>() {
            Ok(ip) => query(ip).map_err(LookupError::Failed),
            Err(_) => Err(LookupError::InvalidAddress),
        };
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(raw.to_owned(), result.clone());
        result
    }

    fn lookup(&self, database: &Mutex<Database>, raw: &str) -> Lookup {
        self.cached_lookup(raw, |ip| {
            let reader = {
                let mut database = database.lock().unwrap_or_else(PoisonError::into_inner);
                if database.refresh() {
                    self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
                }
                Arc::clone(&database.reader)
            };
            reader.lookup::<CityRecord>(ip).map_err(|e| e.to_string())
        })
    }
}

impl Action for GeoIpAction {
    fn arguments(&self) -> &'static [ArgumentSpec] {
        &ARGUMENTS
    }

    fn init(&mut self, arguments: &Arguments) -> Result<(), ActionError> {
        let path = arguments
            .string(DATABASE)
            .map(PathBuf::from)
            .or_else(|| self.default_database.clone())
            .ok_or_else(|| {
                ActionError::new("no GeoIP database given and no default database is configured")
            })?;
        let database = Database::open(&path).map_err(ActionError::new)?;
        tracing::debug!(path = %path.display(), "opened GeoIP database");
        self.database = Some(Mutex::new(database));
        Ok(())
    }

    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
        let Some(database) = &self.database else {
            return Err(ActionError::new("GeoIP database is not open"));
        };
        let field = arguments.string(FIELD).unwrap_or_default();
        let raw = resolve_string(event, field)?.to_owned();

        let record = match self.lookup(database, &raw) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(LookupError::InvalidAddress) => {
                return Err(ActionError::new(format!(
                    "Field '{field}' is not a valid IP address"
                )));
            }
            Err(LookupError::Failed(e)) => {
                return Err(ActionError::new(format!("GeoIP2 lookup failed: {e}")));
            }
        };

        let target = arguments.string(TARGET).unwrap_or(DEFAULT_TARGET);
        apply_record(event, target, &record)
    }
}

/// 레코드를 대상 맵에 병합합니다. 도시 ID가 없으면 아무것도 하지 않습니다.
fn apply_record(event: &mut Event, target: &str, record: &CityRecord) -> Result<(), ActionError> {
    let found = record
        .city
        .as_ref()
        .and_then(|city| city.geoname_id)
        .is_some_and(|id| id != 0);
    if !found {
        return Ok(());
    }

    let mut data = match event.resolve(target) {
        Ok(Some(Value::Map(existing))) => existing.clone(),
        Ok(_) => Map::new(),
        Err(e) => {
            return Err(ActionError::new(format!(
                "Failed to load target field '{target}': {e}"
            )));
        }
    };

    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            data.insert(key.to_owned(), value);
        }
    };
    let text = |value: Option<&str>| value.map(Value::from);

    put("city_name", text(record.city.as_ref().and_then(Place::name)));
    put(
        "continent_name",
        text(record.continent.as_ref().and_then(Place::name)),
    );
    put(
        "country_iso_code",
        text(record.country.as_ref().and_then(|c| c.iso_code.as_deref())),
    );
    put(
        "country_name",
        text(record.country.as_ref().and_then(Place::name)),
    );
    if let Some(location) = &record.location {
        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
            put(
                "location",
                Some(Value::List(vec![Value::Float(lon), Value::Float(lat)])),
            );
            put("latitude", Some(Value::Float(lat)));
            put("longitude", Some(Value::Float(lon)));
        }
        put("timezone", text(location.time_zone.as_deref()));
    }
    put(
        "postal_code",
        text(record.postal.as_ref().and_then(|p| p.code.as_deref())),
    );
    if let Some(region) = record.subdivisions.first() {
        put("region_iso_code", text(region.iso_code.as_deref()));
        put("region_name", text(region.name()));
    }

    event.set(target, data).map(|_| ()).map_err(|e| {
        ActionError::new(format!("Failed to set target field '{target}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ArgumentValue;
    use std::io::Write;

    fn record(json: serde_json::Value) -> CityRecord {
        serde_json::from_value(json).unwrap()
    }

    fn london() -> CityRecord {
        record(serde_json::json!({
            "city": {"geoname_id": 2643743, "names": {"en": "London", "de": "London"}},
            "continent": {"code": "EU", "geoname_id": 6255148, "names": {"en": "Europe"}},
            "country": {"iso_code": "GB", "names": {"en": "United Kingdom"}},
            "location": {"latitude": 51.5142, "longitude": -0.0931, "time_zone": "Europe/London"},
            "postal": {"code": "EC2V"},
            "subdivisions": [{"iso_code": "ENG", "names": {"en": "England"}}]
        }))
    }

    #[test]
    fn writes_location_fields_into_target() {
        let mut event = Event::new(Map::new());
        apply_record(&mut event, DEFAULT_TARGET, &london()).unwrap();

        let geo = |key: &str| event.resolve(&format!("source[geo][{key}]")).unwrap().cloned();
        assert_eq!(geo("city_name"), Some(Value::from("London")));
        assert_eq!(geo("continent_name"), Some(Value::from("Europe")));
        assert_eq!(geo("country_iso_code"), Some(Value::from("GB")));
        assert_eq!(geo("region_name"), Some(Value::from("England")));
        assert_eq!(geo("postal_code"), Some(Value::from("EC2V")));
        assert_eq!(geo("timezone"), Some(Value::from("Europe/London")));
        assert_eq!(
            geo("location"),
            Some(Value::List(vec![Value::Float(-0.0931), Value::Float(51.5142)]))
        );
    }

    #[test]
    fn merges_into_existing_target_map() {
        let mut event = Event::new(Map::new());
        event.set("geo[asn]", 64500_i64).unwrap();
        apply_record(&mut event, "geo", &london()).unwrap();
        assert_eq!(event.resolve("geo[asn]").unwrap(), Some(&Value::Int(64500)));
        assert_eq!(
            event.resolve("geo[city_name]").unwrap(),
            Some(&Value::from("London"))
        );
    }

    #[test]
    fn records_without_city_are_ignored() {
        let mut event = Event::new(Map::new());
        let anonymous = record(serde_json::json!({
            "country": {"iso_code": "US", "names": {"en": "United States"}}
        }));
        apply_record(&mut event, DEFAULT_TARGET, &anonymous).unwrap();
        let zero = record(serde_json::json!({"city": {"geoname_id": 0}}));
        apply_record(&mut event, DEFAULT_TARGET, &zero).unwrap();
        assert_eq!(event.resolve("source").unwrap(), None);
    }

    #[test]
    fn invalid_addresses_are_cached_as_failures() {
        let action = GeoIpAction::new(None);
        let queries = std::cell::Cell::new(0);
        let query = |_ip: IpAddr| -> Result<Option<CityRecord>, String> {
            queries.set(queries.get() + 1);
            Ok(None)
        };

        assert_eq!(
            action.cached_lookup("not-an-ip", query),
            Err(LookupError::InvalidAddress)
        );
        assert_eq!(
            action.cached_lookup("not-an-ip", |_| panic!("cached entry must be reused")),
            Err(LookupError::InvalidAddress)
        );
        assert_eq!(queries.get(), 0);
        assert!(action
            .cache
            .lock()
            .unwrap()
            .peek("not-an-ip")
            .is_some_and(|entry| entry == &Err(LookupError::InvalidAddress)));
    }

    #[test]
    fn valid_addresses_query_once_then_hit_the_cache() {
        let action = GeoIpAction::new(None);
        let queries = std::cell::Cell::new(0);
        for _ in 0..3 {
            let result = action.cached_lookup("81.2.69.142", |ip| {
                assert_eq!(ip, "81.2.69.142".parse::<IpAddr>().unwrap());
                queries.set(queries.get() + 1);
                Ok(Some(london()))
            });
            assert!(matches!(result, Ok(Some(_))));
        }
        assert_eq!(queries.get(), 1);

        let failed = action.cached_lookup("10.0.0.1", |_| Err("corrupt search tree".to_owned()));
        assert_eq!(failed, Err(LookupError::Failed("corrupt search tree".to_owned())));
        let again = action.cached_lookup("10.0.0.1", |_| panic!("cached entry must be reused"));
        assert_eq!(again, failed);
    }

    #[test]
    fn init_requires_a_database() {
        let mut action = GeoIpAction::new(None);
        let err = action.init(&Arguments::with_len(3)).unwrap_err();
        assert!(err.to_string().starts_with("no GeoIP database given"));
    }

    #[test]
    fn init_reports_inaccessible_database() {
        let mut action = GeoIpAction::new(Some(PathBuf::from("/nonexistent/GeoLite2-City.mmdb")));
        let err = action.init(&Arguments::with_len(3)).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("GeoIP database file '/nonexistent/GeoLite2-City.mmdb' is not accessible"));
    }

    #[test]
    fn init_rejects_invalid_database_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a maxmind database").unwrap();
        file.flush().unwrap();

        let mut arguments = Arguments::with_len(3);
        arguments.set(
            DATABASE,
            ArgumentValue::String(file.path().display().to_string()),
        );
        let mut action = GeoIpAction::new(None);
        let err = action.init(&arguments).unwrap_err();
        assert!(err.to_string().starts_with("Failed to initialise GeoIP: "));
    }
}
