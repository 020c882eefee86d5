//! Diagnostic lines interleaved with process output.
//!
//! Every line ends with a newline so it renders as its own row in a console view.

use std::path::Path;

use crate::error::LaunchRejection;

pub fn launch_refused(rejection: &LaunchRejection) -> String {
    match rejection {
        LaunchRejection::WorkingDirectoryMissing(cwd) => {
            format!("[启动失败] 工作目录不存在: {}\n", cwd.display())
        }
        LaunchRejection::CommandFileMissing(path) => {
            format!("[启动失败] 命令文件不存在: {}\n", path.display())
        }
        LaunchRejection::EmptyCommand => "[启动失败] 命令为空\n".to_string(),
    }
}

pub fn launch_banner(cwd: &Path, command: &str) -> String {
    format!("[启动] 工作目录: {}\n[启动] 命令: {}\n", cwd.display(), command)
}

pub fn script_unwrapped(script: &str, inline: &str) -> String {
    format!("[启动] 从 {} 解析命令: {}\n", script, inline)
}

pub fn spawn_failed(error: &std::io::Error) -> String {
    format!("[错误] {}\n", error)
}

pub fn exited(code: Option<i32>) -> String {
    format!("[进程退出] 退出码: {}\n", code.unwrap_or(0))
}

pub fn stopped() -> String {
    "[进程已停止]\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn refusal_names_the_missing_path() {
        let line = launch_refused(&LaunchRejection::WorkingDirectoryMissing(PathBuf::from(
            "/missing/dir",
        )));
        assert!(line.contains("工作目录不存在"));
        assert!(line.contains("/missing/dir"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn exit_line_reports_code() {
        assert_eq!(exited(Some(1)), "[进程退出] 退出码: 1\n");
        assert_eq!(exited(None), "[进程退出] 退出码: 0\n");
    }
}
