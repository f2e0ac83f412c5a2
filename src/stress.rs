use crate::cluster::Credentials;
use crate::kubectl::Kubectl;
use crate::Result;
use rand::Rng;
use tracing::info;

pub const NOSQLBENCH_IMAGE: &str = "nosqlbench/nosqlbench";

/// One nosqlbench cql-iot run against the Stargate service.
#[derive(Clone, Debug)]
pub struct StressRun {
    /// Main cycle count, in nosqlbench notation ("10k", "150k").
    pub cycles: String,
    /// Percentage of reads; the workload takes ratios in tenths.
    pub read_percent: u32,
    /// Target ops/s.
    pub rate: u32,
    pub timeout_secs: u64,
}

/// (read, write) workload ratios in tenths, from a read percentage.
pub fn read_write_ratio(read_percent: u32) -> (u32, u32) {
    let read = read_percent / 10;
    (read, 10 - read)
}

pub fn nosqlbench_args(
    run: &StressRun,
    credentials: &Credentials,
    stargate_service: &str,
) -> Vec<String> {
    let (read_ratio, write_ratio) = read_write_ratio(run.read_percent);
    vec![
        "java".to_string(),
        "-jar".to_string(),
        "nb.jar".to_string(),
        "cql-iot".to_string(),
        "rampup-cycles=1k".to_string(),
        format!("cyclerate={}", run.rate),
        format!("username={}", credentials.username),
        format!("password={}", credentials.password),
        format!("main-cycles={}", run.cycles),
        format!("hosts={stargate_service}"),
        "--progress".to_string(),
        "console:1s".to_string(),
        "-v".to_string(),
        format!("write_ratio={write_ratio}"),
        format!("read_ratio={read_ratio}"),
        "async=100".to_string(),
    ]
}

/// The servicetime/responsetime summary lines from a finished run's log.
pub fn cycle_metric_lines(logs: &str) -> Vec<String> {
    logs.lines()
        .filter(|line| {
            line.contains("cqliot_default_main.cycles.servicetime")
                || line.contains("cqliot_default_main.cycles.responsetime")
        })
        .map(str::to_string)
        .collect()
}

/// Run the workload as a Kubernetes job and return the metric summary lines.
pub async fn run_stress(
    kubectl: &Kubectl,
    credentials: &Credentials,
    stargate_service: &str,
    run: &StressRun,
) -> Result<Vec<String>> {
    let job_name = format!("nosqlbench-{}", rand::thread_rng().gen_range(0..100000));
    info!(
        "Starting stress job {}: {} cycles at {} ops/s, {}% reads",
        job_name, run.cycles, run.rate, run.read_percent
    );
    kubectl
        .create_job(
            &job_name,
            NOSQLBENCH_IMAGE,
            &nosqlbench_args(run, credentials, stargate_service),
        )
        .await?;

    let started = std::time::Instant::now();
    kubectl
        .wait_complete(&format!("job/{job_name}"), run.timeout_secs)
        .await?;
    info!(
        "stress test with {} ops/s took {:?}",
        run.rate,
        started.elapsed()
    );

    let logs = kubectl.job_logs(&job_name).await?;
    let metrics = cycle_metric_lines(&logs);
    info!("nosqlbench metrics:\n{}", metrics.join("\n"));
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            username: "k8ssandra-superuser".to_string(),
            password: "s3cret".to_string(),
        }
    }

    #[test]
    fn ratios_are_in_tenths() {
        assert_eq!(read_write_ratio(30), (3, 7));
        assert_eq!(read_write_ratio(0), (0, 10));
        assert_eq!(read_write_ratio(100), (10, 0));
        // non-multiples of ten floor towards writes
        assert_eq!(read_write_ratio(35), (3, 7));
    }

    #[test]
    fn workload_args_carry_rate_cycles_and_ratios() {
        let run = StressRun {
            cycles: "10k".to_string(),
            read_percent: 30,
            rate: 100,
            timeout_secs: 900,
        };
        let args = nosqlbench_args(&run, &credentials(), "k8ssandra-dc1-stargate-service");
        assert_eq!(args[0..4], ["java", "-jar", "nb.jar", "cql-iot"]);
        assert!(args.contains(&"cyclerate=100".to_string()));
        assert!(args.contains(&"main-cycles=10k".to_string()));
        assert!(args.contains(&"hosts=k8ssandra-dc1-stargate-service".to_string()));
        assert!(args.contains(&"write_ratio=7".to_string()));
        assert!(args.contains(&"read_ratio=3".to_string()));
        assert!(args.contains(&"username=k8ssandra-superuser".to_string()));
    }

    #[test]
    fn only_cycle_metric_lines_survive_the_log_scrape() {
        let logs = "\
INFO  [main] nosqlbench started
cqliot_default_main.cycles.servicetime  mean=1.2ms p99=8ms
some unrelated progress line
cqliot_default_main.cycles.responsetime mean=1.4ms p99=9ms
DONE";
        let metrics = cycle_metric_lines(logs);
        assert_eq!(metrics.len(), 2);
        assert!(metrics[0].contains("servicetime"));
        assert!(metrics[1].contains("responsetime"));
    }
}
