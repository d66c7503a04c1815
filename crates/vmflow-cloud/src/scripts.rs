//! Built-in bootstrap payload
//!
//! Rendered by [`crate::bootstrap::BootstrapTemplate`]. Slots are filled with
//! values that are already quoted for PowerShell:
//!
//! - `admin_user`, `public_key`, `log_path`: single-quoted string literals
//! - `enable_wsl`, `reboot_after`: `$true` / `$false`

/// Blob and file name the payload is uploaded and executed as
pub const BOOTSTRAP_FILE_NAME: &str = "bootstrap.ps1";

/// In-guest log written by the payload
pub const BOOTSTRAP_LOG_PATH: &str = r"C:\vmflow\bootstrap.log";

/// Installs the OpenSSH server, authorises the operator key and optionally
/// enables the Linux compatibility subsystem.
pub const WINDOWS_BOOTSTRAP: &str = r#"$ErrorActionPreference = 'Stop'

$AdminUser = {{ admin_user }}
$PublicKey = {{ public_key }}
$EnableWsl = {{ enable_wsl }}
$RebootAfter = {{ reboot_after }}
$LogPath = {{ log_path }}

New-Item -ItemType Directory -Force -Path (Split-Path $LogPath) | Out-Null
Start-Transcript -Path $LogPath -Append | Out-Null

try {
    Write-Output "=== vmflow bootstrap for $AdminUser ==="

    $capability = Get-WindowsCapability -Online -Name 'OpenSSH.Server~~~~0.0.1.0'
    if ($capability.State -ne 'Installed') {
        Write-Output '>>> Installing OpenSSH server'
        Add-WindowsCapability -Online -Name 'OpenSSH.Server~~~~0.0.1.0' | Out-Null
    }

    Set-Service -Name sshd -StartupType Automatic
    Start-Service sshd

    if (-not (Get-NetFirewallRule -Name 'vmflow-sshd' -ErrorAction SilentlyContinue)) {
        New-NetFirewallRule -Name 'vmflow-sshd' -DisplayName 'OpenSSH Server (vmflow)' `
            -Enabled True -Direction Inbound -Protocol TCP -Action Allow -LocalPort 22 | Out-Null
    }

    New-ItemProperty -Path 'HKLM:\SOFTWARE\OpenSSH' -Name DefaultShell `
        -Value 'C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe' `
        -PropertyType String -Force | Out-Null

    $keyFile = 'C:\ProgramData\ssh\administrators_authorized_keys'
    Set-Content -Path $keyFile -Value $PublicKey -Encoding ascii
    icacls.exe $keyFile /inheritance:r /grant 'Administrators:F' /grant 'SYSTEM:F' | Out-Null
    Write-Output '>>> Authorised key installed'

    if ($EnableWsl) {
        Write-Output '>>> Enabling Windows Subsystem for Linux'
        dism.exe /online /enable-feature /featurename:Microsoft-Windows-Subsystem-Linux /all /norestart | Out-Null
        dism.exe /online /enable-feature /featurename:VirtualMachinePlatform /all /norestart | Out-Null
    }

    Write-Output '=== bootstrap complete ==='
}
catch {
    Write-Error "bootstrap failed: $_"
    Stop-Transcript | Out-Null
    exit 1
}

Stop-Transcript | Out-Null

if ($RebootAfter) {
    shutdown.exe /r /t 60 /c 'vmflow bootstrap complete'
}
"#;
