use std::process::Command;
use std::time::Duration;

use twine::errors::TwineError;
use twine::status::ServiceStatus;

/// Exit code the wait script uses to report an elapsed timeout.
const WAIT_TIMEOUT_EXIT: i32 = 2;

/// Binding to the OS service manager for a single service.
pub trait ServiceControl: Send + Sync {
    fn status(&self) -> Result<ServiceStatus, TwineError>;

    fn start(&self) -> Result<(), TwineError>;

    fn stop(&self) -> Result<(), TwineError>;

    /// Blocks until the service reports `desired`. `None` waits indefinitely.
    fn wait_for_status(
        &self,
        desired: ServiceStatus,
        timeout: Option<Duration>,
    ) -> Result<(), TwineError>;

    /// Drops any cached state so the next `status` call hits the OS.
    fn refresh(&self) -> Result<(), TwineError> {
        Ok(())
    }

    /// Whether the service is present in the OS service list.
    fn exists(&self) -> Result<bool, TwineError>;
}

/// Controls a Windows service through PowerShell's `Get-Service` and the
/// .NET `ServiceController` it returns, locally or on a remote machine.
#[derive(Debug, Clone)]
pub struct PowerShellControl {
    service_name: String,
    machine: Option<String>,
}

impl PowerShellControl {
    pub fn new(service_name: &str, machine: Option<&str>) -> Result<Self, TwineError> {
        validate_identifier(service_name)?;
        if let Some(machine) = machine {
            validate_identifier(machine)?;
        }

        Ok(Self {
            service_name: service_name.to_string(),
            machine: machine.map(str::to_string),
        })
    }

    fn get_service(&self) -> String {
        match &self.machine {
            Some(machine) => format!(
                "Get-Service -Name '{}' -ComputerName '{}' -ErrorAction Stop",
                self.service_name, machine
            ),
            None => format!("Get-Service -Name '{}' -ErrorAction Stop", self.service_name),
        }
    }

    fn wait_script(&self, desired: ServiceStatus, timeout: Option<Duration>) -> String {
        let wait = match timeout {
            Some(t) => format!(
                "$s.WaitForStatus('{}', [TimeSpan]::FromMilliseconds({}))",
                desired.as_str(),
                t.as_millis()
            ),
            None => format!("$s.WaitForStatus('{}')", desired.as_str()),
        };

        format!(
            "try {{ $s = {}; {}; exit 0 }} \
             catch [System.ServiceProcess.TimeoutException] {{ exit {} }} \
             catch {{ Write-Error $_; exit 1 }}",
            self.get_service(),
            wait,
            WAIT_TIMEOUT_EXIT
        )
    }

    fn run(&self, script: &str) -> Result<std::process::Output, TwineError> {
        Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", script])
            .output()
            .map_err(|e| TwineError::Control(format!("Failed to launch powershell: {}", e)))
    }

    fn run_checked(&self, script: &str) -> Result<String, TwineError> {
        let output = self.run(script)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(TwineError::Control(format!(
                "'{}': {}",
                self.service_name,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl ServiceControl for PowerShellControl {
    fn status(&self) -> Result<ServiceStatus, TwineError> {
        let raw = self.run_checked(&format!("({}).Status.ToString()", self.get_service()))?;
        ServiceStatus::from_str(&raw)
            .ok_or_else(|| TwineError::Parse(format!("Unknown service status '{}'", raw)))
    }

    fn start(&self) -> Result<(), TwineError> {
        self.run_checked(&format!("({}).Start()", self.get_service()))
            .map(|_| ())
    }

    fn stop(&self) -> Result<(), TwineError> {
        self.run_checked(&format!("({}).Stop()", self.get_service()))
            .map(|_| ())
    }

    fn wait_for_status(
        &self,
        desired: ServiceStatus,
        timeout: Option<Duration>,
    ) -> Result<(), TwineError> {
        let output = self.run(&self.wait_script(desired, timeout))?;
        match output.status.code() {
            Some(0) => Ok(()),
            Some(WAIT_TIMEOUT_EXIT) => Err(TwineError::Timeout {
                service: self.service_name.clone(),
                desired: desired.as_str().to_string(),
            }),
            _ => Err(TwineError::Control(format!(
                "'{}': {}",
                self.service_name,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    fn exists(&self) -> Result<bool, TwineError> {
        let script = format!(
            "if ({}) {{ 'yes' }} else {{ 'no' }}",
            self.get_service().replace("-ErrorAction Stop", "-ErrorAction SilentlyContinue")
        );
        Ok(self.run_checked(&script)? == "yes")
    }
}

/// Rejects names that could break out of the single-quoted PowerShell argument.
/// `$` is allowed since single quotes suppress expansion (`MSSQL$SQLEXPRESS`).
fn validate_identifier(value: &str) -> Result<(), TwineError> {
    const FORBIDDEN: &[char] = &['\'', '"', '`', ';', '&', '|', '\n', '\r'];

    if value.trim().is_empty() || value.contains(FORBIDDEN) {
        return Err(TwineError::Config(format!("Invalid service identifier '{}'", value)));
    }
    Ok(())
}
