//! 워커 풀 -- 입력 배치를 병렬로 처리해 출력 채널로 내보냅니다.
//!
//! # 내부 아키텍처
//! ```text
//!                 ┌────────────── coordinator ──────────────┐
//! input (bounded) │ track ─> fanout ─> worker x N ─> collect │ ─> enforce ─> output (bounded)
//!                 └──────────────── reload / shutdown ───────┘
//! ```
//!
//! 코디네이터 태스크 하나가 입력, 리로드, 종료 신호를 받습니다. 처리 중인
//! 배치 수는 워커 수의 두 배로 제한되며, 한도에 닿으면 입력 읽기를 멈춰
//! 상류에 배압을 전달합니다. 배치는 버려지지 않습니다.
//!
//! 리로드 시 현재 세대의 워커만 취소하고, 모두 멈추면 새 프로그램으로 다시
//! 띄웁니다. 아직 워커가 가져가지 않은 배치는 큐에 남아 새 세대가 처리합니다.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use logforge_core::error::{LogforgeError, PipelineError};
use logforge_core::metrics as m;
use logforge_core::{Bundle, Sequencer};

use crate::config::ProcessorConfig;
use crate::error::ProcessorError;
use crate::node::Program;

/// 풀 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    /// 생성됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 코디네이터 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// 입력을 받는 중
    Running,
    /// 리로드를 위해 워커를 멈추는 중
    SoftStopping,
    /// 입력이 닫혀 처리 중인 배치만 마무리하는 중
    Draining,
}

/// 풀과 연결된 채널들
///
/// `input`을 모두 drop하면 풀은 남은 배치를 처리한 뒤 `output`을 닫습니다.
#[derive(Debug)]
pub struct PoolChannels {
    /// 처리할 배치를 넣는 채널
    pub input: mpsc::Sender<Bundle>,
    /// 처리된 배치가 나오는 채널
    pub output: mpsc::Receiver<Bundle>,
    /// 새 설정을 넣는 채널
    pub reload: mpsc::Sender<ProcessorConfig>,
}

/// 이벤트 처리 워커 풀
///
/// # 사용 예시
/// ```ignore
/// use logforge_processor::PoolBuilder;
///
/// let (mut pool, mut channels) = PoolBuilder::new().config(config).build()?;
/// pool.start()?;
///
/// channels.input.send(bundle).await?;
/// let processed = channels.output.recv().await;
///
/// pool.stop().await?;
/// ```
pub struct Pool {
    state: PoolState,
    config: ProcessorConfig,
    shutdown: CancellationToken,
    input: Option<mpsc::Receiver<Bundle>>,
    output: Option<mpsc::Sender<Bundle>>,
    reload: Option<mpsc::Receiver<ProcessorConfig>>,
    task: Option<JoinHandle<()>>,
}

impl Pool {
    /// 현재 상태 이름을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            PoolState::Initialized => "initialized",
            PoolState::Running => "running",
            PoolState::Stopped => "stopped",
        }
    }

    /// 풀 종료 토큰. 취소하면 입력을 더 받지 않고 처리 중인 배치를 마무리합니다.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 코디네이터 태스크를 시작합니다.
    pub fn start(&mut self) -> Result<(), LogforgeError> {
        if self.state == PoolState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let (Some(input), Some(output), Some(reload)) =
            (self.input.take(), self.output.take(), self.reload.take())
        else {
            return Err(PipelineError::InitFailed("pool channels were already consumed".to_owned()).into());
        };

        tracing::info!(
            routines = self.config.routines,
            ordered = self.config.ordered,
            "starting worker pool"
        );

        let coordinator = Coordinator {
            config: self.config.clone(),
            input,
            output,
            reload,
            shutdown: self.shutdown.clone(),
            sequencer: self.config.ordered.then(Sequencer::new),
        };
        self.task = Some(tokio::spawn(coordinator.run()));
        self.state = PoolState::Running;
        Ok(())
    }

    /// 풀을 정지하고 처리 중인 배치가 모두 출력될 때까지 기다립니다.
    pub async fn stop(&mut self) -> Result<(), LogforgeError> {
        if self.state != PoolState::Running {
            return Err(PipelineError::NotRunning.into());
        }
        self.shutdown.cancel();
        self.wait().await
    }

    /// 코디네이터가 끝날 때까지 기다립니다 (입력이 닫히거나 종료 토큰이 취소될 때).
    pub async fn wait(&mut self) -> Result<(), LogforgeError> {
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| PipelineError::ChannelRecv(format!("pool coordinator failed: {e}")))?;
        }
        self.state = PoolState::Stopped;
        tracing::info!("worker pool stopped");
        Ok(())
    }
}

/// 풀 빌더
pub struct PoolBuilder {
    config: ProcessorConfig,
    shutdown: Option<CancellationToken>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            config: ProcessorConfig::default(),
            shutdown: None,
        }
    }

    /// 풀 설정을 지정합니다.
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// 외부 종료 토큰을 사용합니다. 지정하지 않으면 새 토큰을 만듭니다.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// 풀과 채널을 생성합니다.
    pub fn build(self) -> Result<(Pool, PoolChannels), ProcessorError> {
        self.config.validate()?;

        let capacity = self.config.channel_capacity;
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);
        let (reload_tx, reload_rx) = mpsc::channel(1);

        let pool = Pool {
            state: PoolState::Initialized,
            config: self.config,
            shutdown: self.shutdown.unwrap_or_default(),
            input: Some(input_rx),
            output: Some(output_tx),
            reload: Some(reload_rx),
            task: None,
        };
        let channels = PoolChannels {
            input: input_tx,
            output: output_rx,
            reload: reload_tx,
        };
        Ok((pool, channels))
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type Queue = Arc<Mutex<mpsc::UnboundedReceiver<Bundle>>>;

struct Coordinator {
    config: ProcessorConfig,
    input: mpsc::Receiver<Bundle>,
    output: mpsc::Sender<Bundle>,
    reload: mpsc::Receiver<ProcessorConfig>,
    shutdown: CancellationToken,
    sequencer: Option<Sequencer>,
}

/// 현재 세대의 워커들
struct Generation {
    token: CancellationToken,
    workers: JoinSet<()>,
}

impl Generation {
    fn spawn(
        config: &ProcessorConfig,
        queue: &Queue,
        results: &mpsc::UnboundedSender<Bundle>,
    ) -> Self {
        let token = CancellationToken::new();
        let mut workers = JoinSet::new();
        for id in 0..config.routines {
            workers.spawn(worker(
                id,
                Arc::clone(&config.program),
                config.debug_events,
                Arc::clone(queue),
                results.clone(),
                token.clone(),
            ));
        }
        metrics::gauge!(m::PROCESSOR_ROUTINES).set(config.routines as f64);
        Self { token, workers }
    }

    /// 모든 워커를 취소하고 끝날 때까지 기다립니다.
    async fn stop(mut self) {
        self.token.cancel();
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "pool worker terminated abnormally");
            }
        }
        metrics::gauge!(m::PROCESSOR_ROUTINES).set(0.0);
    }
}

impl Coordinator {
    async fn run(mut self) {
        let (fanout, queue) = mpsc::unbounded_channel::<Bundle>();
        let queue: Queue = Arc::new(Mutex::new(queue));
        let (results, mut collected) = mpsc::unbounded_channel::<Bundle>();

        let mut generation = Generation::spawn(&self.config, &queue, &results);
        let mut phase = Phase::Running;
        let mut reload_open = true;
        let mut in_flight = 0usize;

        loop {
            if phase == Phase::Draining && in_flight == 0 {
                break;
            }
            let limit = self.config.routines * 2;

            tokio::select! {
                biased;

                () = self.shutdown.cancelled(), if phase == Phase::Running => {
                    tracing::info!(in_flight, "worker pool draining");
                    phase = Phase::Draining;
                }

                Some(bundle) = collected.recv() => {
                    in_flight -= 1;
                    if !self.emit(bundle).await {
                        tracing::warn!("pool output receiver dropped, stopping");
                        break;
                    }
                }

                config = self.reload.recv(), if reload_open && phase == Phase::Running => {
                    match config {
                        Some(config) => {
                            phase = Phase::SoftStopping;
                            generation = self.reload(generation, config, &queue, &results).await;
                            phase = Phase::Running;
                        }
                        None => reload_open = false,
                    }
                }

                bundle = self.input.recv(), if phase == Phase::Running && in_flight < limit => {
                    match bundle {
                        Some(mut bundle) => {
                            if let Some(sequencer) = self.sequencer.as_mut() {
                                sequencer.track(&mut bundle);
                            }
                            in_flight += 1;
                            // 수신측은 `queue`로 살아 있으므로 실패하지 않습니다.
                            let _ = fanout.send(bundle);
                        }
                        None => {
                            tracing::info!(in_flight, "pool input closed, draining");
                            phase = Phase::Draining;
                        }
                    }
                }
            }
        }

        generation.stop().await;
        tracing::debug!(phase = ?phase, "pool coordinator exiting");
    }

    /// 워커를 멈추고 새 설정으로 다시 띄웁니다.
    ///
    /// 순서 복원 여부와 채널 용량은 바꿀 수 없어 무시됩니다.
    async fn reload(
        &mut self,
        generation: Generation,
        config: ProcessorConfig,
        queue: &Queue,
        results: &mpsc::UnboundedSender<Bundle>,
    ) -> Generation {
        tracing::info!(
            routines = config.routines,
            nodes = config.program.len(),
            "reloading worker pool"
        );
        if config.ordered != self.config.ordered
            || config.channel_capacity != self.config.channel_capacity
        {
            tracing::warn!("ordered and channel_capacity cannot change on reload, ignoring");
        }
        let started = Instant::now();
        generation.stop().await;

        self.config.program = config.program;
        self.config.routines = config.routines;
        self.config.debug_events = config.debug_events;

        let generation = Generation::spawn(&self.config, queue, results);
        metrics::counter!(m::PROCESSOR_RELOADS_TOTAL, m::LABEL_RESULT => "success").increment(1);
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "worker pool reload complete"
        );
        generation
    }

    /// 처리된 배치를 출력합니다. 출력 수신측이 사라졌으면 `false`를 반환합니다.
    async fn emit(&mut self, bundle: Bundle) -> bool {
        let ready = match self.sequencer.as_mut() {
            Some(sequencer) => sequencer.enforce(bundle),
            None => vec![bundle],
        };
        for bundle in ready {
            if self.output.send(bundle).await.is_err() {
                return false;
            }
        }
        true
    }
}

/// 워커 하나의 루프
async fn worker(
    id: usize,
    program: Arc<Program>,
    debug_events: bool,
    queue: Queue,
    results: mpsc::UnboundedSender<Bundle>,
    token: CancellationToken,
) {
    tracing::debug!(worker = id, "pool worker started");
    loop {
        let bundle = tokio::select! {
            biased;
            () = token.cancelled() => break,
            bundle = next(&queue) => bundle,
        };
        let Some(mut bundle) = bundle else {
            break;
        };
        process_bundle(&program, &mut bundle, debug_events);
        if results.send(bundle).is_err() {
            break;
        }
    }
    tracing::debug!(worker = id, "pool worker stopped");
}

async fn next(queue: &Queue) -> Option<Bundle> {
    queue.lock().await.recv().await
}

/// 배치의 이벤트를 순서대로 처리합니다.
pub fn process_bundle(program: &Program, bundle: &mut Bundle, debug_events: bool) {
    let started = Instant::now();
    let count = bundle.len();
    for event in bundle.events_mut() {
        program.execute(event);
        if debug_events {
            let encoded = event.bytes();
            tracing::debug!(event = %String::from_utf8_lossy(&encoded), "processed event");
        }
    }
    let elapsed = started.elapsed();

    metrics::counter!(m::PROCESSOR_BATCHES_PROCESSED_TOTAL).increment(1);
    metrics::counter!(m::PROCESSOR_EVENTS_PROCESSED_TOTAL).increment(count as u64);
    metrics::histogram!(m::PROCESSOR_BATCH_DURATION_SECONDS).record(elapsed.as_secs_f64());
    tracing::debug!(
        events = count,
        elapsed_us = elapsed.as_micros() as u64,
        "processed batch"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionContext, ActionRegistry};
    use crate::script::compile_script;
    use logforge_core::{Event, Map, Value};
    use std::time::Duration;

    fn program(source: &str) -> Program {
        compile_script(source, &ActionRegistry::with_defaults(), &ActionContext::default()).unwrap()
    }

    fn bundle(index: i64, len: usize) -> Bundle {
        Bundle::new(
            (0..len)
                .map(|i| {
                    let mut map = Map::new();
                    map.insert("batch".to_owned(), Value::Int(index));
                    map.insert("seq".to_owned(), Value::Int(i as i64));
                    Event::new(map)
                })
                .collect(),
        )
    }

    fn config(source: &str, routines: usize, ordered: bool) -> ProcessorConfig {
        ProcessorConfig {
            routines,
            ordered,
            program: Arc::new(program(source)),
            ..ProcessorConfig::default()
        }
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = ProcessorConfig {
            routines: 0,
            ..ProcessorConfig::default()
        };
        assert!(PoolBuilder::new().config(config).build().is_err());
    }

    #[test]
    fn process_bundle_runs_every_event() {
        let program = program("set seen = true");
        let mut bundle = bundle(0, 3);
        process_bundle(&program, &mut bundle, true);
        for event in bundle.events() {
            assert_eq!(event.resolve("seen").unwrap(), Some(&Value::Bool(true)));
        }
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let (mut pool, _channels) = PoolBuilder::new().build().unwrap();
        assert_eq!(pool.state_name(), "initialized");
        assert!(pool.stop().await.is_err());

        pool.start().unwrap();
        assert_eq!(pool.state_name(), "running");
        assert!(pool.start().is_err());

        pool.stop().await.unwrap();
        assert_eq!(pool.state_name(), "stopped");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ordered_pool_preserves_input_order() {
        let (mut pool, mut channels) = PoolBuilder::new()
            .config(config("add_tag tag=\"done\"", 4, true))
            .build()
            .unwrap();
        pool.start().unwrap();

        let input = channels.input.clone();
        let producer = tokio::spawn(async move {
            for index in 0..50 {
                input.send(bundle(index, 1 + (index as usize % 7))).await.unwrap();
            }
        });
        drop(channels.input);

        let mut seen = Vec::new();
        while let Some(bundle) = channels.output.recv().await {
            assert!(bundle.events().iter().all(|e| e.has_tag("done")));
            seen.push(bundle.events()[0].resolve("batch").unwrap().cloned());
        }
        producer.await.unwrap();
        pool.wait().await.unwrap();

        let expected: Vec<_> = (0..50).map(|i| Some(Value::Int(i))).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn unordered_pool_keeps_bundles_intact() {
        let (mut pool, mut channels) = PoolBuilder::new()
            .config(config("set processed = true", 3, false))
            .build()
            .unwrap();
        pool.start().unwrap();

        let input = channels.input.clone();
        tokio::spawn(async move {
            for index in 0..20 {
                input.send(bundle(index, 4)).await.unwrap();
            }
        });
        drop(channels.input);

        let mut batches = Vec::new();
        while let Some(bundle) = channels.output.recv().await {
            let seqs: Vec<_> = bundle
                .events()
                .iter()
                .map(|e| e.resolve("seq").unwrap().cloned())
                .collect();
            assert_eq!(seqs, (0..4).map(|i| Some(Value::Int(i))).collect::<Vec<_>>());
            batches.push(bundle);
        }
        assert_eq!(batches.len(), 20);
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_and_closes_output() {
        let token = CancellationToken::new();
        let (mut pool, mut channels) = PoolBuilder::new()
            .config(config("set processed = true", 2, true))
            .shutdown(token.clone())
            .build()
            .unwrap();
        pool.start().unwrap();

        channels.input.send(bundle(0, 2)).await.unwrap();
        let first = channels.output.recv().await.unwrap();
        assert_eq!(first.len(), 2);

        token.cancel();
        pool.wait().await.unwrap();
        assert!(channels.output.recv().await.is_none());
        assert!(channels.input.send(bundle(1, 1)).await.is_err());
    }

    #[tokio::test]
    async fn reload_swaps_the_program() {
        let (mut pool, mut channels) = PoolBuilder::new()
            .config(config("set version = 1", 2, true))
            .build()
            .unwrap();
        pool.start().unwrap();

        channels.input.send(bundle(0, 1)).await.unwrap();
        let before = channels.output.recv().await.unwrap();
        assert_eq!(before.events()[0].resolve("version").unwrap(), Some(&Value::Int(1)));

        channels.reload.send(config("set version = 2", 3, true)).await.unwrap();

        // 리로드는 입력보다 먼저 처리되므로 이후 배치는 새 프로그램을 봅니다.
        tokio::time::sleep(Duration::from_millis(50)).await;
        channels.input.send(bundle(1, 1)).await.unwrap();
        let after = channels.output.recv().await.unwrap();
        assert_eq!(after.events()[0].resolve("version").unwrap(), Some(&Value::Int(2)));

        pool.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reload_during_traffic_loses_nothing() {
        let (mut pool, mut channels) = PoolBuilder::new()
            .config(config("set version = 1", 2, true))
            .build()
            .unwrap();
        pool.start().unwrap();

        let input = channels.input.clone();
        let reload = channels.reload.clone();
        tokio::spawn(async move {
            for index in 0..40 {
                if index == 20 {
                    reload.send(config("set version = 2", 2, true)).await.unwrap();
                }
                input.send(bundle(index, 2)).await.unwrap();
            }
        });
        drop(channels.input);

        let mut indexes = Vec::new();
        while let Some(bundle) = channels.output.recv().await {
            let version = bundle.events()[0].resolve("version").unwrap().cloned();
            assert!(matches!(version, Some(Value::Int(1 | 2))));
            indexes.push(bundle.events()[0].resolve("batch").unwrap().cloned());
        }
        let expected: Vec<_> = (0..40).map(|i| Some(Value::Int(i))).collect();
        assert_eq!(indexes, expected);
    }
}
