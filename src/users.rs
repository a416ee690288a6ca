use once_cell::sync::OnceCell;
use rand::Rng;

/// Synthetic identity presented to the authentication endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Read-only pool of synthetic users shared by every virtual user.
///
/// Built once at startup; no writer exists afterwards, so concurrent reads
/// need no locking.
pub struct UserPool {
    users: Vec<TestUser>,
}

static POOL: OnceCell<UserPool> = OnceCell::new();

/// Build the process-wide pool, or return the existing one if a pool was
/// already initialized.
pub fn init_pool(count: usize) -> &'static UserPool {
    POOL.get_or_init(|| UserPool::generate(count))
}

impl UserPool {
    pub fn generate(count: usize) -> Self {
        let users = (0..count.max(1))
            .map(|i| TestUser {
                email: format!("test.user.{i}@example.com"),
                first_name: format!("TestUser{i}"),
                last_name: format!("LastName{i}"),
            })
            .collect();
        Self { users }
    }

    /// Uniformly random member of the pool.
    pub fn pick(&self) -> &TestUser {
        let idx = rand::thread_rng().gen_range(0..self.users.len());
        &self.users[idx]
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
