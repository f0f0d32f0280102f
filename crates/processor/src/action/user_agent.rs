//! `user_agent`: User-Agent 문자열을 브라우저, 운영체제, 장치로 분류합니다.
//!
//! 분류 규칙은 ua-parser `regexes.yaml` 형식의 정규식 목록이며 처음 일치한
//! 규칙이 이깁니다. 기본은 `resources/user_agent.yaml`에 번들된 규칙이고,
//! `definitions` 인자나 `processor.user_agent_definitions`로 uap-core 원본 같은
//! 외부 파일을 줄 수 있습니다. `regex` 크레이트가 컴파일하지 못하는 규칙
//! (전후방 탐색 등)은 경고를 남기고 건너뜁니다.
//!
//! 파싱 결과는 원본 문자열을 키로 LRU 캐시에 보관합니다.
//!
//! 채우는 필드:
//!
//! - `user_agent[original]`, `user_agent[name]`, `user_agent[version]`
//! - `user_agent[major]`, `user_agent[minor]`, `user_agent[patch]`
//! - `user_agent[device][name]`
//! - `user_agent[os][family]`, `user_agent[os][version]`, `user_agent[os][major]`, `user_agent[os][minor]`
//!
//! 값이 없는 버전 필드는 쓰지 않습니다.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use lru::LruCache;
use regex::{Captures, Regex, RegexBuilder};
use serde::Deserialize;

use logforge_core::{Event, Value};

use super::{
    Action, ActionError, ArgumentKind, ArgumentSpec, Arguments, remove_field, resolve_string,
};

static ARGUMENTS: [ArgumentSpec; 3] = [
    ArgumentSpec::required("field", ArgumentKind::String),
    ArgumentSpec::optional("remove", ArgumentKind::Bool),
    ArgumentSpec::optional("definitions", ArgumentKind::String).literal_only(),
];

const FIELD: usize = 0;
const REMOVE: usize = 1;
const DEFINITIONS: usize = 2;

const CACHE_SIZE: usize = 1000;
/// uap-core의 일부 규칙은 기본 한도를 넘습니다.
const REGEX_SIZE_LIMIT: usize = 64 * (1 << 20);
const OTHER: &str = "Other";

static BUNDLED_RULES: &str = include_str!("../../resources/user_agent.yaml");

/// 규칙 파일의 한 항목
#[derive(Debug, Default, Deserialize)]
struct RuleDefinition {
    regex: String,
    regex_flag: Option<String>,
    family_replacement: Option<String>,
    v1_replacement: Option<String>,
    v2_replacement: Option<String>,
    v3_replacement: Option<String>,
    os_replacement: Option<String>,
    os_v1_replacement: Option<String>,
    os_v2_replacement: Option<String>,
    os_v3_replacement: Option<String>,
    os_v4_replacement: Option<String>,
    device_replacement: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    user_agent_parsers: Vec<RuleDefinition>,
    os_parsers: Vec<RuleDefinition>,
    device_parsers: Vec<RuleDefinition>,
}

/// 컴파일된 규칙. `templates[i]`가 없으면 `$(i+1)`을 씁니다.
#[derive(Debug)]
struct Rule {
    regex: Regex,
    templates: Vec<Option<String>>,
}

impl Rule {
    fn compile(definition: &RuleDefinition, templates: Vec<Option<String>>) -> Result<Self, String> {
        let regex = RegexBuilder::new(&definition.regex)
            .case_insensitive(definition.regex_flag.as_deref() == Some("i"))
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| format!("invalid user agent regex '{}': {e}", definition.regex))?;
        Ok(Self { regex, templates })
    }

    /// 일치하면 슬롯마다 값을 돌려줍니다. 빈 값은 `None`입니다.
    fn apply(&self, input: &str) -> Option<Vec<Option<String>>> {
        let captures = self.regex.captures(input)?;
        let slots = self
            .templates
            .iter()
            .enumerate()
            .map(|(slot, template)| {
                let value = match template {
                    Some(template) => expand(template, &captures),
                    None => captures
                        .get(slot + 1)
                        .map(|m| m.as_str().to_owned())
                        .unwrap_or_default(),
                };
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_owned())
            })
            .collect();
        Some(slots)
    }
}

/// `$1`..`$9`를 캡처 그룹으로 치환합니다. 참여하지 않은 그룹은 빈 문자열입니다.
fn expand(template: &str, captures: &Captures<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(digit) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                if let Some(group) = captures.get(digit as usize) {
                    out.push_str(group.as_str());
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn compile_section<F>(definitions: &[RuleDefinition], skipped: &mut usize, templates: F) -> Vec<Rule>
where
    F: Fn(&RuleDefinition) -> Vec<Option<String>>,
{
    definitions
        .iter()
        .filter_map(|definition| match Rule::compile(definition, templates(definition)) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::debug!(error = %e, "skipping user agent rule");
                *skipped += 1;
                None
            }
        })
        .collect()
}

/// 분류 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Client {
    pub name: String,
    pub major: Option<String>,
    pub minor: Option<String>,
    pub patch: Option<String>,
    pub os_family: String,
    pub os_major: Option<String>,
    pub os_minor: Option<String>,
    pub os_patch: Option<String>,
    pub os_patch_minor: Option<String>,
    pub device: String,
}

impl Client {
    /// `major[.minor[.patch]]`
    pub fn version(&self) -> Option<String> {
        join_version(&[&self.major, &self.minor, &self.patch])
    }

    /// `major[.minor[.patch[.patch_minor]]]`
    pub fn os_version(&self) -> Option<String> {
        join_version(&[
            &self.os_major,
            &self.os_minor,
            &self.os_patch,
            &self.os_patch_minor,
        ])
    }
}

fn join_version(parts: &[&Option<String>]) -> Option<String> {
    let present: Vec<&str> = parts
        .iter()
        .map_while(|part| part.as_deref())
        .collect();
    (!present.is_empty()).then(|| present.join("."))
}

/// 규칙 집합
#[derive(Debug)]
pub struct UserAgentParser {
    agents: Vec<Rule>,
    systems: Vec<Rule>,
    devices: Vec<Rule>,
    skipped: usize,
}

impl UserAgentParser {
    /// YAML 규칙 파일에서 파서를 만듭니다.
    ///
    /// YAML 자체가 잘못되면 실패합니다. 컴파일되지 않는 개별 규칙은 건너뜁니다.
    pub fn from_yaml(source: &str) -> Result<Self, String> {
        let file: RuleFile = serde_yaml::from_str(source)
            .map_err(|e| format!("invalid user agent rules: {e}"))?;

        let mut skipped = 0;
        let agents = compile_section(&file.user_agent_parsers, &mut skipped, |d| {
            vec![
                d.family_replacement.clone(),
                d.v1_replacement.clone(),
                d.v2_replacement.clone(),
                d.v3_replacement.clone(),
            ]
        });
        let systems = compile_section(&file.os_parsers, &mut skipped, |d| {
            vec![
                d.os_replacement.clone(),
                d.os_v1_replacement.clone(),
                d.os_v2_replacement.clone(),
                d.os_v3_replacement.clone(),
                d.os_v4_replacement.clone(),
            ]
        });
        let devices = compile_section(&file.device_parsers, &mut skipped, |d| {
            vec![d.device_replacement.clone()]
        });

        if skipped > 0 {
            tracing::warn!(skipped, "user agent rules not supported by the regex engine were skipped");
        }
        Ok(Self {
            agents,
            systems,
            devices,
            skipped,
        })
    }

    /// 규칙 파일을 읽어 파서를 만듭니다.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            format!(
                "user agent definitions '{}' are not readable: {e}",
                path.display()
            )
        })?;
        let parser = Self::from_yaml(&source)?;
        tracing::debug!(
            path = %path.display(),
            agents = parser.agents.len(),
            systems = parser.systems.len(),
            devices = parser.devices.len(),
            "loaded user agent definitions"
        );
        Ok(parser)
    }

    /// 번들된 규칙으로 만든 공유 파서
    pub fn bundled() -> Result<Arc<Self>, String> {
        static BUNDLED: OnceLock<Result<Arc<UserAgentParser>, String>> = OnceLock::new();
        BUNDLED
            .get_or_init(|| Self::from_yaml(BUNDLED_RULES).map(Arc::new))
            .clone()
    }

    /// 컴파일하지 못해 건너뛴 규칙 수
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn parse(&self, input: &str) -> Client {
        let first = |rules: &[Rule]| rules.iter().find_map(|rule| rule.apply(input));
        let mut client = Client {
            name: OTHER.to_owned(),
            os_family: OTHER.to_owned(),
            device: OTHER.to_owned(),
            ..Client::default()
        };

        if let Some(mut slots) = first(&self.agents) {
            client.name = slots[0].take().unwrap_or_else(|| OTHER.to_owned());
            client.major = slots[1].take();
            client.minor = slots[2].take();
            client.patch = slots[3].take();
        }
        if let Some(mut slots) = first(&self.systems) {
            client.os_family = slots[0].take().unwrap_or_else(|| OTHER.to_owned());
            client.os_major = slots[1].take();
            client.os_minor = slots[2].take();
            client.os_patch = slots[3].take();
            client.os_patch_minor = slots[4].take();
        }
        if let Some(mut slots) = first(&self.devices) {
            client.device = slots[0].take().unwrap_or_else(|| OTHER.to_owned());
        }
        client
    }
}

#[derive(Debug)]
pub struct UserAgentAction {
    default_definitions: Option<PathBuf>,
    parser: Option<Arc<UserAgentParser>>,
    cache: Mutex<LruCache<String, Arc<Client>>>,
}

impl Default for UserAgentAction {
    fn default() -> Self {
        Self::new(None)
    }
}

impl UserAgentAction {
    /// `default_definitions`는 `definitions` 인자가 없을 때 사용합니다.
    /// 둘 다 없으면 번들된 규칙을 씁니다.
    pub fn new(default_definitions: Option<PathBuf>) -> Self {
        Self {
            default_definitions,
            parser: None,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn classify(&self, parser: &UserAgentParser, input: &str) -> Arc<Client> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = cache.get(input) {
            return Arc::clone(client);
        }
        let client = Arc::new(parser.parse(input));
        cache.put(input.to_owned(), Arc::clone(&client));
        client
    }
}

impl Action for UserAgentAction {
    fn arguments(&self) -> &'static [ArgumentSpec] {
        &ARGUMENTS
    }

    fn init(&mut self, arguments: &Arguments) -> Result<(), ActionError> {
        let path = arguments
            .string(DEFINITIONS)
            .map(PathBuf::from)
            .or_else(|| self.default_definitions.clone());
        let parser = match path {
            Some(path) => UserAgentParser::from_file(&path).map(Arc::new),
            None => UserAgentParser::bundled(),
        };
        self.parser = Some(parser.map_err(ActionError::new)?);
        Ok(())
    }

    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
        let Some(parser) = &self.parser else {
            return Err(ActionError::new("user agent parser is not initialised"));
        };
        let field = arguments.string(FIELD).unwrap_or_default();
        let original = resolve_string(event, field)?.to_owned();
        let client = self.classify(parser, &original);

        let mut set = |path: &str, value: Option<String>| -> Result<(), ActionError> {
            let Some(value) = value else {
                return Ok(());
            };
            event
                .set(path, Value::String(value))
                .map(|_| ())
                .map_err(|e| ActionError::new(format!("Failed to set field '{path}': {e}")))
        };
        set("user_agent[original]", Some(original.clone()))?;
        set("user_agent[name]", Some(client.name.clone()))?;
        set("user_agent[version]", client.version())?;
        set("user_agent[major]", client.major.clone())?;
        set("user_agent[minor]", client.minor.clone())?;
        set("user_agent[patch]", client.patch.clone())?;
        set("user_agent[device][name]", Some(client.device.clone()))?;
        set("user_agent[os][family]", Some(client.os_family.clone()))?;
        set("user_agent[os][version]", client.os_version())?;
        set("user_agent[os][major]", client.os_major.clone())?;
        set("user_agent[os][minor]", client.os_minor.clone())?;

        if arguments.bool(REMOVE) {
            remove_field(event, field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ArgumentValue;
    use logforge_core::Map;
    use std::io::Write;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.109 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1.2 Mobile/15E148 Safari/604.1";
    const CHROME_ANDROID: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.43 Mobile Safari/537.36";
    const EDGE_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";

    fn parser() -> Arc<UserAgentParser> {
        UserAgentParser::bundled().unwrap()
    }

    #[test]
    fn bundled_rules_compile() {
        let parser = parser();
        assert!(!parser.agents.is_empty());
        assert!(!parser.systems.is_empty());
        assert!(!parser.devices.is_empty());
        assert_eq!(parser.skipped(), 0);
    }

    #[test]
    fn classifies_desktop_chrome() {
        let client = parser().parse(CHROME_WINDOWS);
        assert_eq!(client.name, "Chrome");
        assert_eq!(client.version().as_deref(), Some("120.0.6099"));
        assert_eq!(client.os_family, "Windows");
        assert_eq!(client.os_major.as_deref(), Some("10"));
        assert_eq!(client.device, "Other");
    }

    #[test]
    fn classifies_mobile_safari() {
        let client = parser().parse(SAFARI_IPHONE);
        assert_eq!(client.name, "Mobile Safari");
        assert_eq!(client.major.as_deref(), Some("17"));
        assert_eq!(client.os_family, "iOS");
        assert_eq!(client.os_version().as_deref(), Some("17.1.2"));
        assert_eq!(client.device, "iPhone");
    }

    #[test]
    fn classifies_android_device_model() {
        let client = parser().parse(CHROME_ANDROID);
        assert_eq!(client.name, "Chrome Mobile");
        assert_eq!(client.os_family, "Android");
        assert_eq!(client.os_major.as_deref(), Some("13"));
        assert_eq!(client.device, "Pixel 7");
    }

    #[test]
    fn derivatives_win_over_chrome() {
        let client = parser().parse(EDGE_MAC);
        assert_eq!(client.name, "Edge");
        assert_eq!(client.major.as_deref(), Some("120"));
        assert_eq!(client.os_family, "Mac OS X");
        assert_eq!(client.os_version().as_deref(), Some("10.15.7"));
        assert_eq!(client.device, "Mac");
    }

    #[test]
    fn classifies_crawlers_as_spiders() {
        let googlebot = parser().parse(
            "Mozilla/5.0 (Linux; Android 6.0.1; Nexus 5X Build/MMB29P) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.6045.199 Mobile Safari/537.36 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        );
        assert_eq!(googlebot.name, "Googlebot");
        assert_eq!(googlebot.version().as_deref(), Some("2.1"));
        assert_eq!(googlebot.os_family, "Android");
        assert_eq!(googlebot.device, "Spider");

        let preview = parser()
            .parse("facebookexternalhit/1.1 (+http://www.facebook.com/externalhit_uatext.php)");
        assert_eq!(preview.name, "facebookexternalhit");
        assert_eq!(preview.version().as_deref(), Some("1.1"));
        assert_eq!(preview.os_family, "Other");
        assert_eq!(preview.device, "Spider");
    }

    #[test]
    fn classifies_regional_android_browsers() {
        let uc = parser().parse(
            "Mozilla/5.0 (Linux; U; Android 10; en-US; RMX1911 Build/QKQ1.200209.002) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/78.0.3904.108 UCBrowser/13.4.0.1306 Mobile Safari/537.36",
        );
        assert_eq!(uc.name, "UC Browser");
        assert_eq!(uc.version().as_deref(), Some("13.4.0"));
        assert_eq!(uc.os_family, "Android");
        assert_eq!(uc.os_major.as_deref(), Some("10"));
        assert_eq!(uc.device, "RMX1911");

        let samsung = parser().parse(
            "Mozilla/5.0 (Linux; Android 13; SM-S911B) AppleWebKit/537.36 (KHTML, like Gecko) SamsungBrowser/23.0 Chrome/115.0.0.0 Mobile Safari/537.36",
        );
        assert_eq!(samsung.name, "Samsung Internet");
        assert_eq!(samsung.version().as_deref(), Some("23.0"));
        assert_eq!(samsung.device, "Samsung SM-S911B");

        let opera_mini = parser().parse(
            "Opera/9.80 (Android; Opera Mini/36.2.2254/119.132; U; id) Presto/2.12.423 Version/12.16",
        );
        assert_eq!(opera_mini.name, "Opera Mini");
        assert_eq!(opera_mini.version().as_deref(), Some("36.2.2254"));
        assert_eq!(opera_mini.os_family, "Android");
        assert_eq!(opera_mini.os_major, None);
    }

    #[test]
    fn classifies_webviews_and_in_app_browsers() {
        let webview = parser().parse(
            "Mozilla/5.0 (Linux; Android 12; SM-A515F Build/SP1A.210812.016; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/119.0.6045.163 Mobile Safari/537.36",
        );
        assert_eq!(webview.name, "Chrome Mobile WebView");
        assert_eq!(webview.version().as_deref(), Some("119.0.6045"));
        assert_eq!(webview.os_major.as_deref(), Some("12"));
        assert_eq!(webview.device, "Samsung SM-A515F");

        let facebook = parser().parse(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 [FBAN/FBIOS;FBAV/435.0.0.34.109;FBBV/532385614;FBDV/iPhone14,5;FBMD/iPhone;FBSN/iOS;FBSV/16.6;FBSS/3;FBID/phone;FBLC/en_US;FBOP/5]",
        );
        assert_eq!(facebook.name, "Facebook");
        assert_eq!(facebook.version().as_deref(), Some("435.0.0"));
        assert_eq!(facebook.os_family, "iOS");
        assert_eq!(facebook.os_version().as_deref(), Some("16.6"));
        assert_eq!(facebook.device, "iPhone");
    }

    #[test]
    fn classifies_phones_and_consoles_outside_desktop_families() {
        let lumia = parser().parse(
            "Mozilla/5.0 (compatible; MSIE 10.0; Windows Phone 8.0; Trident/6.0; IEMobile/10.0; ARM; Touch; NOKIA; Lumia 920)",
        );
        assert_eq!(lumia.name, "IE Mobile");
        assert_eq!(lumia.version().as_deref(), Some("10.0"));
        assert_eq!(lumia.os_family, "Windows Phone");
        assert_eq!(lumia.os_version().as_deref(), Some("8.0"));
        assert_eq!(lumia.device, "Lumia 920");

        let kaios = parser().parse(
            "Mozilla/5.0 (Mobile; LYF/F300B/LYF-F300B-001-01-15-130718-i; Android; rv:48.0) Gecko/48.0 Firefox/48.0 KAIOS/2.5",
        );
        assert_eq!(kaios.name, "Firefox Mobile");
        assert_eq!(kaios.os_family, "KaiOS");
        assert_eq!(kaios.os_version().as_deref(), Some("2.5"));
        assert_eq!(kaios.device, "Generic Feature Phone");

        let console = parser().parse(
            "Mozilla/5.0 (PlayStation; PlayStation 5/2.26) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0 Safari/605.1.15",
        );
        assert_eq!(console.name, "Safari");
        assert_eq!(console.os_family, "PlayStation 5");
        assert_eq!(console.os_version().as_deref(), Some("2.26"));
        assert_eq!(console.device, "PlayStation 5");
    }

    #[test]
    fn classifies_automation_clients() {
        let headless = parser().parse(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) HeadlessChrome/120.0.6099.109 Safari/537.36",
        );
        assert_eq!(headless.name, "HeadlessChrome");
        assert_eq!(headless.os_family, "Linux");
        assert_eq!(headless.device, "Spider");

        let java = parser().parse("Java/1.8.0_292");
        assert_eq!(java.name, "Java");
        assert_eq!(java.version().as_deref(), Some("1.8.0"));
    }

    #[test]
    fn unsupported_rules_are_skipped() {
        let yaml = r#"
user_agent_parsers:
  - regex: '(Foo)(?=/)'
  - regex: '(Foo)/(\d+)'
os_parsers: []
device_parsers:
  - regex: '(Bar)'
    device_replacement: 'Bar Device'
    brand_replacement: 'Bar'
    model_replacement: '$1'
"#;
        let parser = UserAgentParser::from_yaml(yaml).unwrap();
        assert_eq!(parser.skipped(), 1);
        let client = parser.parse("Foo/3 Bar");
        assert_eq!(client.name, "Foo");
        assert_eq!(client.major.as_deref(), Some("3"));
        assert_eq!(client.device, "Bar Device");
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let err = UserAgentParser::from_yaml("user_agent_parsers: 3").unwrap_err();
        assert!(err.starts_with("invalid user agent rules: "));
    }

    #[test]
    fn definitions_argument_loads_external_rules() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "user_agent_parsers:\n  - regex: '(InternalTool)/(\\d+)\\.(\\d+)'\nos_parsers: []\ndevice_parsers: []"
        )
        .unwrap();
        file.flush().unwrap();

        let mut arguments = Arguments::with_len(3);
        arguments.set(FIELD, ArgumentValue::String("agent".to_owned()));
        arguments.set(
            DEFINITIONS,
            ArgumentValue::String(file.path().display().to_string()),
        );
        let mut action = UserAgentAction::default();
        action.init(&arguments).unwrap();

        let mut map = Map::new();
        map.insert("agent".to_owned(), Value::from("InternalTool/4.2"));
        let mut event = Event::new(map);
        action.process(&mut event, &arguments).unwrap();
        assert_eq!(
            event.resolve("user_agent[name]").unwrap(),
            Some(&Value::from("InternalTool"))
        );
        assert_eq!(
            event.resolve("user_agent[version]").unwrap(),
            Some(&Value::from("4.2"))
        );

        // 외부 규칙만 쓰므로 번들된 규칙의 curl은 모릅니다.
        let mut map = Map::new();
        map.insert("agent".to_owned(), Value::from("curl/8.4.0"));
        let mut event = Event::new(map);
        action.process(&mut event, &arguments).unwrap();
        assert_eq!(
            event.resolve("user_agent[name]").unwrap(),
            Some(&Value::from("Other"))
        );
    }

    #[test]
    fn default_definitions_must_be_readable() {
        let mut action =
            UserAgentAction::new(Some(PathBuf::from("/nonexistent/uap/regexes.yaml")));
        let err = action.init(&Arguments::with_len(3)).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("user agent definitions '/nonexistent/uap/regexes.yaml' are not readable"));
    }

    #[test]
    fn unknown_agents_are_other() {
        let client = parser().parse("something-unusual");
        assert_eq!(client.name, "Other");
        assert_eq!(client.os_family, "Other");
        assert_eq!(client.device, "Other");
        assert_eq!(client.version(), None);
    }

    #[test]
    fn version_stops_at_first_gap() {
        let client = Client {
            major: Some("1".to_owned()),
            patch: Some("3".to_owned()),
            ..Client::default()
        };
        assert_eq!(client.version().as_deref(), Some("1"));
    }

    #[test]
    fn action_populates_event_and_caches() {
        let mut arguments = Arguments::with_len(3);
        arguments.set(FIELD, ArgumentValue::String("agent".to_owned()));
        arguments.set(REMOVE, ArgumentValue::Bool(true));
        let mut action = UserAgentAction::default();
        action.init(&arguments).unwrap();

        for _ in 0..2 {
            let mut map = Map::new();
            map.insert("agent".to_owned(), Value::from("curl/8.4.0"));
            let mut event = Event::new(map);
            action.process(&mut event, &arguments).unwrap();

            let get = |path: &str| event.resolve(path).unwrap().cloned();
            assert_eq!(get("user_agent[original]"), Some(Value::from("curl/8.4.0")));
            assert_eq!(get("user_agent[name]"), Some(Value::from("curl")));
            assert_eq!(get("user_agent[version]"), Some(Value::from("8.4.0")));
            assert_eq!(get("user_agent[patch]"), Some(Value::from("0")));
            assert_eq!(get("user_agent[os][family]"), Some(Value::from("Other")));
            assert_eq!(get("user_agent[os][version]"), None);
            assert_eq!(get("agent"), None);
        }
        let cache = action.cache.lock().unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn replacement_templates_expand_groups() {
        let regex = Regex::new(r"(a)(b)?").unwrap();
        let captures = regex.captures("a").unwrap();
        assert_eq!(expand("x$1-$2$", &captures), "xa-$");
    }
}
