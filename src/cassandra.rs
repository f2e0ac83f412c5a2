use crate::cluster::Credentials;
use crate::exec::ExecCommand;
use crate::Result;
use kube::Client;
use tracing::{debug, warn};

pub const CASSANDRA_CONTAINER: &str = "cassandra";
const CQLSH: &str = "/opt/cassandra/bin/cqlsh";

/// cqlsh driver running inside the Cassandra statefulset pod, authenticated
/// as the superuser. Queries return raw cqlsh text; content checks live in
/// the parsers below.
pub struct Cqlsh {
    pod_name: String,
    namespace: String,
    credentials: Credentials,
    client: Client,
}

impl Cqlsh {
    pub fn new(
        pod_name: String,
        namespace: String,
        credentials: Credentials,
        client: Client,
    ) -> Self {
        Self {
            pod_name,
            namespace,
            credentials,
            client,
        }
    }

    pub async fn run_query(&self, query: &str) -> Result<String> {
        debug!("cqlsh on {}: {}", self.pod_name, query);
        let cql_command = vec![
            CQLSH.to_string(),
            "--username".to_string(),
            self.credentials.username.clone(),
            "--password".to_string(),
            self.credentials.password.clone(),
            "-e".to_string(),
            query.to_string(),
        ];
        let command = ExecCommand::new(
            self.pod_name.clone(),
            CASSANDRA_CONTAINER.to_string(),
            &self.namespace,
            self.client.clone(),
        );
        let output = command.execute(&cql_command).await?;
        if !output.success {
            warn!(
                "cqlsh exited unsuccessfully on {}: {}",
                self.pod_name,
                output.stderr.trim_end()
            );
        }
        Ok(output.stdout)
    }

    pub async fn create_keyspace(&self, keyspace: &str) -> Result<()> {
        self.run_query(&format!(
            "CREATE KEYSPACE IF NOT EXISTS {keyspace} with replication = \
             {{'class':'SimpleStrategy', 'replication_factor':1}};"
        ))
        .await?;
        Ok(())
    }

    pub async fn create_table(&self, keyspace: &str, table: &str) -> Result<()> {
        self.run_query(&format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.{table}(id timeuuid PRIMARY KEY, val text);"
        ))
        .await?;
        Ok(())
    }

    /// Insert `rows` rows with server-generated timeuuid keys.
    pub async fn load_rows(&self, rows: u32, keyspace: &str, table: &str) -> Result<()> {
        for row in 0..rows {
            self.run_query(&format!(
                "INSERT INTO {keyspace}.{table}(id,val) values(now(), '{row}');"
            ))
            .await?;
        }
        Ok(())
    }

    pub async fn keyspace_exists(&self, keyspace: &str) -> Result<bool> {
        let output = self.run_query("describe keyspaces").await?;
        Ok(list_keyspaces(&output).iter().any(|name| name == keyspace))
    }

    pub async fn count_rows_matches(&self, rows: u32, keyspace: &str, table: &str) -> Result<bool> {
        let output = self
            .run_query(&format!("SELECT id FROM {keyspace}.{table}"))
            .await?;
        Ok(contains_row_count(&output, rows))
    }
}

/// Keyspace names from `describe keyspaces` output, which cqlsh prints as
/// whitespace-separated columns over several lines.
pub fn list_keyspaces(output: &str) -> Vec<String> {
    output.split_whitespace().map(str::to_string).collect()
}

/// The result-set footer cqlsh prints after a SELECT.
pub fn row_count_marker(rows: u32) -> String {
    format!("({rows} rows)")
}

pub fn contains_row_count(output: &str, rows: u32) -> bool {
    output.contains(&row_count_marker(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIBE_KEYSPACES: &str = "\nreaper_db      system_auth  system_schema  system_views\nmedusa  system       system_distributed  system_traces  system_virtual_schema\n\n";

    #[test]
    fn keyspaces_are_exact_tokens() {
        let keyspaces = list_keyspaces(DESCRIBE_KEYSPACES);
        assert!(keyspaces.contains(&"reaper_db".to_string()));
        assert!(keyspaces.contains(&"medusa".to_string()));
        // substring of a real keyspace is not a keyspace
        assert!(!keyspaces.contains(&"reaper".to_string()));
        assert!(!keyspaces.contains(&"system_".to_string()));
    }

    #[test]
    fn row_count_footer_is_matched_literally() {
        let select_output = "\n id\n--------------------------------------\n 84bb2b30-46b6-11eb-8372-a1b55a9cfa5d\n d35c1fe0-46b6-11eb-8372-a1b55a9cfa5d\n\n(10 rows)\n";
        assert!(contains_row_count(select_output, 10));
        assert!(!contains_row_count(select_output, 20));
        // (1 rows) is what cqlsh really prints for a single row
        assert_eq!(row_count_marker(1), "(1 rows)");
    }
}
