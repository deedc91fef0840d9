use ild_db::Server;

/// A host device passed through to the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMapping {
    pub host_path: String,
    pub container_path: String,
    /// cgroup permissions, e.g. `rwm`.
    pub permissions: String,
}

impl DeviceMapping {
    fn passthrough(path: &str) -> Self {
        Self {
            host_path: path.into(),
            container_path: path.into(),
            permissions: "rwm".into(),
        }
    }

    /// ECS spells permissions out.
    pub fn ecs_permissions(&self) -> Vec<String> {
        self.permissions
            .chars()
            .filter_map(|c| match c {
                'r' => Some("read".to_string()),
                'w' => Some("write".to_string()),
                'm' => Some("mknod".to_string()),
                _ => None,
            })
            .collect()
    }
}

pub trait DeviceBuilder: Send + Sync + 'static {
    fn devices(&self, server: &Server) -> Vec<DeviceMapping>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevices;

impl DeviceBuilder for NoDevices {
    fn devices(&self, _server: &Server) -> Vec<DeviceMapping> {
        Vec::new()
    }
}

/// NVIDIA control, UVM and first GPU device nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NvidiaDevices;

impl DeviceBuilder for NvidiaDevices {
    fn devices(&self, _server: &Server) -> Vec<DeviceMapping> {
        ["/dev/nvidiactl", "/dev/nvidia-uvm", "/dev/nvidia0"]
            .into_iter()
            .map(DeviceMapping::passthrough)
            .collect()
    }
}
