//! Local job execution
//!
//! The direct executor runs each job as a child process of the engine, in a
//! sandbox directory below the computer's work directory. The job id is the
//! sandbox path, so results stay retrievable after the engine restarts.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{Mutex, MutexGuard}
};

use tracing::{Level, event};

use crate::{
    domain::{
        computer::{SCHEDULER_DIRECT, TRANSPORT_LOCAL},
        constant,
        error::EngineError,
        job::{JobRequest, JobStatus}
    },
    port::executor::JobExecutor
};

pub const SUBMIT_SCRIPT: &str = "_job_submit.sh";

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell script that runs the executable with the job's redirections
pub fn submit_script(request: &JobRequest) -> String {
    let mut line = vec![quote(&request.executable.to_string_lossy())];
    line.extend(request.cmdline_params.iter().map(|param| quote(param)));
    if let Some(stdin) = &request.stdin_name {
        line.push(format!("< {}", quote(stdin)));
    }
    line.push(format!("> {}", quote(&request.stdout_name)));
    line.push(format!("2> {}", quote(&request.stderr_name)));

    let mut script = String::from("#!/bin/sh\n");
    for text in [request.prepend_text.trim(), line.join(" ").as_str(), request.append_text.trim()] {
        if !text.is_empty() {
            script.push_str(text);
            script.push('\n');
        }
    }
    script
}

#[derive(Debug, Default)]
pub struct DirectJobExecutor {
    running:  Mutex<HashMap<String, Child>>,
    finished: Mutex<HashMap<String, Option<i32>>>
}

impl DirectJobExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn running(&self) -> Result<MutexGuard<'_, HashMap<String, Child>>, EngineError> {
        self.running.lock().map_err(|_| EngineError::Execution("job table lock poisoned".to_string()))
    }

    fn finished(&self) -> Result<MutexGuard<'_, HashMap<String, Option<i32>>>, EngineError> {
        self.finished.lock().map_err(|_| EngineError::Execution("job table lock poisoned".to_string()))
    }

    fn check_request(request: &JobRequest) -> Result<(), EngineError> {
        if request.transport_type != TRANSPORT_LOCAL {
            return Err(EngineError::Configuration(format!(
                "transport '{}' is not supported, only '{}'",
                request.transport_type, TRANSPORT_LOCAL
            )));
        }
        if request.scheduler_type != SCHEDULER_DIRECT {
            return Err(EngineError::Configuration(format!(
                "scheduler '{}' is not supported, only '{}'",
                request.scheduler_type, SCHEDULER_DIRECT
            )));
        }
        Ok(())
    }

    fn prepare_sandbox(request: &JobRequest) -> Result<PathBuf, EngineError> {
        let sandbox = request.workdir.join(&request.uuid);
        fs::create_dir_all(&sandbox)?;
        for (name, content) in &request.files {
            fs::write(sandbox.join(name), content)?;
        }
        fs::write(sandbox.join(SUBMIT_SCRIPT), submit_script(request))?;
        Ok(sandbox)
    }
}

impl JobExecutor for DirectJobExecutor {
    fn submit(&self, request: &JobRequest) -> Result<String, EngineError> {
        Self::check_request(request)?;
        let sandbox = Self::prepare_sandbox(request)?;

        let child = Command::new("sh")
            .arg(SUBMIT_SCRIPT)
            .current_dir(&sandbox)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Execution(format!("failed to start job in {}: {}", sandbox.display(), e)))?;

        let job_id = sandbox.to_string_lossy().to_string();
        event!(Level::DEBUG, event = constant::job::JOB_SUBMITTED, job_id = %job_id, os_pid = child.id());
        self.running()?.insert(job_id.clone(), child);
        Ok(job_id)
    }

    fn poll(&self, job_id: &str) -> Result<JobStatus, EngineError> {
        if let Some(exit_code) = self.finished()?.get(job_id) {
            return Ok(JobStatus::Done { exit_code: *exit_code });
        }

        let mut running = self.running()?;
        let Some(child) = running.get_mut(job_id) else {
            // Started by an earlier session; whatever it left behind is the result.
            return Ok(JobStatus::Done { exit_code: None });
        };

        match child.try_wait()? {
            Some(status) => {
                running.remove(job_id);
                event!(
                    Level::DEBUG,
                    event = constant::job::JOB_COMPLETED,
                    job_id = %job_id,
                    exit_code = ?status.code()
                );
                self.finished()?.insert(job_id.to_string(), status.code());
                Ok(JobStatus::Done { exit_code: status.code() })
            }
            None => Ok(JobStatus::Running)
        }
    }

    fn kill(&self, job_id: &str) -> Result<(), EngineError> {
        let Some(mut child) = self.running()?.remove(job_id) else {
            return Ok(());
        };
        // The child may already have exited between polls.
        let _ = child.kill();
        let status = child.wait()?;
        event!(Level::INFO, event = constant::job::JOB_KILLED, job_id = %job_id);
        self.finished()?.insert(job_id.to_string(), status.code());
        Ok(())
    }

    fn retrieve(&self, job_id: &str) -> Result<PathBuf, EngineError> {
        let sandbox = Path::new(job_id);
        if !sandbox.is_dir() {
            return Err(EngineError::NotExistent(format!("job sandbox {} does not exist", job_id)));
        }
        Ok(sandbox.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, thread, time::Duration};

    use tempfile::TempDir;

    use super::*;

    fn request(workdir: &Path, executable: &str, params: &[&str]) -> JobRequest {
        JobRequest {
            uuid:           "job-1".into(),
            executable:     PathBuf::from(executable),
            cmdline_params: params.iter().map(|p| p.to_string()).collect(),
            workdir:        workdir.to_path_buf(),
            transport_type: TRANSPORT_LOCAL.into(),
            scheduler_type: SCHEDULER_DIRECT.into(),
            files:          BTreeMap::from([("aiida.in".to_string(), "hello from input\n".to_string())]),
            stdin_name:     Some("aiida.in".into()),
            stdout_name:    "aiida.out".into(),
            stderr_name:    "aiida.err".into(),
            prepend_text:   String::new(),
            append_text:    String::new()
        }
    }

    fn wait(executor: &DirectJobExecutor, job_id: &str) -> JobStatus {
        for _ in 0..200 {
            match executor.poll(job_id).unwrap() {
                JobStatus::Running => thread::sleep(Duration::from_millis(25)),
                done => return done
            }
        }
        panic!("job {} did not finish", job_id);
    }

    #[test]
    fn test_script_quotes_and_redirects() {
        let mut req = request(Path::new("/tmp"), "/bin/my code", &["it's"]);
        req.prepend_text = "export A=1\n".into();
        let script = submit_script(&req);
        assert_eq!(
            script,
            "#!/bin/sh\nexport A=1\n'/bin/my code' 'it'\\''s' < 'aiida.in' > 'aiida.out' 2> 'aiida.err'\n"
        );
    }

    #[test]
    fn test_runs_job_in_sandbox() {
        let dir = TempDir::new().unwrap();
        let executor = DirectJobExecutor::new();

        let job_id = executor.submit(&request(dir.path(), "cat", &[])).unwrap();
        assert_eq!(wait(&executor, &job_id), JobStatus::Done { exit_code: Some(0) });

        let sandbox = executor.retrieve(&job_id).unwrap();
        assert_eq!(sandbox, dir.path().join("job-1"));
        assert_eq!(fs::read_to_string(sandbox.join("aiida.out")).unwrap(), "hello from input\n");
    }

    #[test]
    fn test_rejects_other_schedulers() {
        let dir = TempDir::new().unwrap();
        let mut req = request(dir.path(), "cat", &[]);
        req.scheduler_type = "slurm".into();
        assert!(matches!(DirectJobExecutor::new().submit(&req), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_kill_stops_the_job() {
        let dir = TempDir::new().unwrap();
        let executor = DirectJobExecutor::new();
        let mut req = request(dir.path(), "sleep", &["30"]);
        req.stdin_name = None;

        let job_id = executor.submit(&req).unwrap();
        executor.kill(&job_id).unwrap();
        assert!(matches!(executor.poll(&job_id).unwrap(), JobStatus::Done { .. }));
    }
}
