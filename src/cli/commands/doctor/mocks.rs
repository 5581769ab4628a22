// Scripted fakes for the process, network and prompt seams

use super::console::Prompt;
use crate::external::command::parse_json_records;
use crate::external::{
    CertificateInfo, CommandError, CommandExecutor, CommandOutput, HttpProbeError, HttpRequest, HttpResponse,
    NetworkProbe, OutputMode, TcpProbeError, TlsProbeError,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

struct Rule {
    pattern: Vec<String>,
    /// Consumed front to back, the last one repeats
    outputs: VecDeque<CommandOutput>,
}

impl Rule {
    /// The program must match exactly. Each further token must occur, in
    /// order, as an argument or inside one.
    fn matches(&self, argv: &[&str]) -> bool {
        let Some((program, rest)) = self.pattern.split_first() else {
            return false;
        };
        if argv.first() != Some(&program.as_str()) {
            return false;
        }
        let mut args = argv.iter().skip(1);
        rest.iter().all(|token| args.any(|arg| arg.contains(token.as_str())))
    }
}

/// Command executor answering from scripted rules.
///
/// The most specific matching rule answers. Unmatched commands behave as if
/// the program were not installed.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    tools: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, pattern: &[&str], output: CommandOutput) {
        self.on_sequence(pattern, vec![output]);
    }

    pub fn on_sequence(&self, pattern: &[&str], outputs: Vec<CommandOutput>) {
        let pattern: Vec<String> = pattern.iter().map(|s| s.to_string()).collect();
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|rule| rule.pattern != pattern);
        rules.push(Rule {
            pattern,
            outputs: outputs.into(),
        });
    }

    pub fn ok(&self, pattern: &[&str], stdout: &str) {
        self.on(pattern, CommandOutput::completed(0, stdout, ""));
    }

    pub fn exit(&self, pattern: &[&str], code: i32) {
        self.on(pattern, CommandOutput::completed(code, "", ""));
    }

    /// Make `program` resolvable on the fake PATH
    pub fn with_tool(&self, program: &str) {
        self.tools.lock().unwrap().insert(program.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any call's command line contains `fragment`
    pub fn ran(&self, fragment: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|call| call.contains(fragment))
    }

    pub fn count(&self, fragment: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| call.contains(fragment)).count()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, argv: &[&str], _timeout: Duration, mode: OutputMode) -> CommandOutput {
        self.calls.lock().unwrap().push(argv.join(" "));

        let mut rules = self.rules.lock().unwrap();
        let matched = rules
            .iter_mut()
            .filter(|rule| rule.matches(argv))
            .max_by_key(|rule| rule.pattern.len());

        let Some(rule) = matched else {
            return CommandOutput::from_error(CommandError::CommandNotFound {
                command: argv.first().unwrap_or(&"").to_string(),
            });
        };

        let mut output = if rule.outputs.len() > 1 {
            rule.outputs.pop_front().unwrap()
        } else {
            rule.outputs.front().cloned().unwrap_or_default()
        };
        if mode == OutputMode::JsonLines {
            output.records = parse_json_records(&output.stdout);
        }
        output
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.tools
            .lock()
            .unwrap()
            .contains(program)
            .then(|| PathBuf::from(format!("/usr/bin/{program}")))
    }
}

/// Network probe answering from scripted tables.
///
/// Unscripted TCP targets refuse, unscripted TLS and HTTP targets fail to connect.
#[derive(Default)]
pub struct ScriptedNetwork {
    tcp: Mutex<HashMap<(String, u16), Result<(), TcpProbeError>>>,
    tls: Mutex<HashMap<(String, u16, bool), Result<CertificateInfo, TlsProbeError>>>,
    http: Mutex<HashMap<String, Result<HttpResponse, HttpProbeError>>>,
    http_calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tcp(&self, host: &str, port: u16, result: Result<(), TcpProbeError>) {
        self.tcp.lock().unwrap().insert((host.to_string(), port), result);
    }

    pub fn tls(&self, host: &str, port: u16, verify: bool, result: Result<CertificateInfo, TlsProbeError>) {
        self.tls.lock().unwrap().insert((host.to_string(), port, verify), result);
    }

    pub fn http(&self, url: &str, result: Result<HttpResponse, HttpProbeError>) {
        self.http.lock().unwrap().insert(url.to_string(), result);
    }

    pub fn http_status(&self, url: &str, status: u16) {
        self.http(
            url,
            Ok(HttpResponse {
                status,
                ..Default::default()
            }),
        );
    }

    pub fn http_calls(&self) -> Vec<String> {
        self.http_calls.lock().unwrap().clone()
    }
}

pub fn certificate(common_name: &str, expires_in_days: i64) -> CertificateInfo {
    CertificateInfo {
        common_name: Some(common_name.to_string()),
        not_after: "Dec 31 23:59:59 2030 GMT".to_string(),
        expires_in_days,
    }
}

#[async_trait]
impl NetworkProbe for ScriptedNetwork {
    async fn tcp_connect(&self, host: &str, port: u16, _timeout: Duration) -> Result<(), TcpProbeError> {
        self.tcp
            .lock()
            .unwrap()
            .get(&(host.to_string(), port))
            .cloned()
            .unwrap_or(Err(TcpProbeError::Refused))
    }

    async fn peer_certificate(
        &self,
        host: &str,
        port: u16,
        verify: bool,
        _timeout: Duration,
    ) -> Result<CertificateInfo, TlsProbeError> {
        self.tls
            .lock()
            .unwrap()
            .get(&(host.to_string(), port, verify))
            .cloned()
            .unwrap_or_else(|| Err(TlsProbeError::Connect("connection refused".to_string())))
    }

    async fn http_get(&self, request: &HttpRequest) -> Result<HttpResponse, HttpProbeError> {
        self.http_calls.lock().unwrap().push(request.url.clone());
        self.http
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Err(HttpProbeError::Connect("connection refused".to_string())))
    }
}

/// Prompt with a fixed answer that records the questions asked
pub struct ScriptedPrompt {
    answer: bool,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, question: &str, _default_yes: bool) -> bool {
        self.asked.lock().unwrap().push(question.to_string());
        self.answer
    }
}
