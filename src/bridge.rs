use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::{error::Error, task::Task, wg::WireguardApi};

/// Entry point for a host application.
///
/// The callback methods spawn onto the current `tokio::task::LocalSet`
/// and must be called from inside one; completions run there too, never
/// on the worker that talked to the device. Two operations on the same
/// interface are not ordered against each other.
pub struct Bridge<B> {
    api: Arc<B>,
}

impl<B> Clone for Bridge<B> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
        }
    }
}

impl<B: WireguardApi> Bridge<B> {
    pub fn new(api: B) -> Self {
        Self::from_arc(Arc::new(api))
    }

    pub fn from_arc(api: Arc<B>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<B> {
        &self.api
    }

    pub fn configure_task(&self, name: &str, description: &Value) -> Task<()> {
        Task::configure(self.api.clone(), name, description)
    }

    pub fn query_task(&self, name: &str) -> Task<Value> {
        Task::query(self.api.clone(), name)
    }

    pub fn list_task(&self) -> Task<Vec<String>> {
        Task::list(self.api.clone())
    }

    pub fn configure<F>(&self, name: &str, description: &Value, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<(), Error>) + 'static,
    {
        self.configure_task(name, description).then(completion)
    }

    pub fn query<F>(&self, name: &str, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Value, Error>) + 'static,
    {
        self.query_task(name).then(completion)
    }

    pub fn list_interfaces<F>(&self, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Vec<String>, Error>) + 'static,
    {
        self.list_task().then(completion)
    }

    /// Every interface's state keyed by name. Interfaces are queried
    /// concurrently; the first failure wins.
    pub async fn query_all(&self) -> Result<Map<String, Value>, Error> {
        let names = self.list_task().run().await?;
        let states = try_join_all(names.iter().map(|name| self.query_task(name).run())).await?;

        Ok(names.into_iter().zip(states).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use serde_json::json;
    use tokio::task::LocalSet;

    use super::*;
    use crate::{
        error::{DeviceError, ValidationError},
        wg::{Key, memory::{ENODEV, MemoryBackend}},
    };

    fn slot<T>() -> (Rc<RefCell<Option<T>>>, Rc<RefCell<Option<T>>>) {
        let slot = Rc::new(RefCell::new(None));
        (slot.clone(), slot)
    }

    #[tokio::test]
    async fn test_configure_then_query() {
        let bridge = Bridge::new(MemoryBackend::with_interfaces(["wg0"]));
        bridge.api().add_interface("wg1");

        let private = Key::generate_private();
        let peer = Key::random().to_string();
        let gone = Key::random().to_string();

        let description = json!({
            "privateKey": private.to_string(),
            "portListen": 51820,
            "Address": ["10.0.0.1/24", 42],
            "peers": {
                peer.clone(): {
                    "endpoint": "203.0.113.5:51820",
                    "allowedIPs": ["10.0.0.2/32"],
                    "keepInterval": 25
                },
                gone.clone(): { "removeMe": true, "endpoint": "1.2.3.4:51820" }
            }
        });

        let (configured, configured_out) = slot();
        let (state, state_out) = slot();

        LocalSet::new()
            .run_until(async {
                bridge
                    .configure("wg0", &description, move |res| {
                        *configured.borrow_mut() = Some(res)
                    })
                    .await
                    .unwrap();

                bridge
                    .query("wg0", move |res| *state.borrow_mut() = Some(res))
                    .await
                    .unwrap();
            })
            .await;

        configured_out.borrow_mut().take().unwrap().unwrap();
        let state = state_out.borrow_mut().take().unwrap().unwrap();

        assert_eq!(
            state,
            json!({
                "publicKey": private.public_key().to_string(),
                "privateKey": private.to_string(),
                "portListen": 51820,
                "Address": ["10.0.0.1/24"],
                "peers": {
                    peer: {
                        "keepInterval": 25,
                        "endpoint": "203.0.113.5:51820",
                        "allowedIPs": ["10.0.0.2/32"]
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn test_configure_reports_validation_error() {
        let bridge = Bridge::new(MemoryBackend::with_interfaces(["wg0"]));
        let (result, result_out) = slot();

        LocalSet::new()
            .run_until(async {
                bridge
                    .configure("wg0", &json!({ "portListen": 1 }), move |res| {
                        *result.borrow_mut() = Some(res)
                    })
                    .await
                    .unwrap();
            })
            .await;

        let err = result_out.borrow_mut().take().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingPrivateKey)
        ));
        assert_eq!(err.to_string(), "validation error: missing privateKey");
    }

    #[tokio::test]
    async fn test_query_unknown_interface() {
        let bridge = Bridge::new(MemoryBackend::new());
        let (result, result_out) = slot();

        LocalSet::new()
            .run_until(async {
                bridge
                    .query("wg7", move |res| *result.borrow_mut() = Some(res))
                    .await
                    .unwrap();
            })
            .await;

        let err = result_out.borrow_mut().take().unwrap().unwrap_err();
        assert!(matches!(err, Error::ExternalOperation(_)));
        assert_eq!(err.code(), Some(ENODEV));
    }

    #[tokio::test]
    async fn test_list_interfaces() {
        let bridge = Bridge::new(MemoryBackend::with_interfaces(["wg1", "wg0"]));
        let (listed, listed_out) = slot();
        let (failed, failed_out) = slot();

        LocalSet::new()
            .run_until(async {
                bridge
                    .list_interfaces(move |res| *listed.borrow_mut() = Some(res))
                    .await
                    .unwrap();

                bridge
                    .api()
                    .set_enumeration_failure(Some(DeviceError::new(5, "input/output error")));

                bridge
                    .list_interfaces(move |res| *failed.borrow_mut() = Some(res))
                    .await
                    .unwrap();
            })
            .await;

        assert_eq!(
            listed_out.borrow_mut().take().unwrap().unwrap(),
            vec!["wg0", "wg1"]
        );

        let err = failed_out.borrow_mut().take().unwrap().unwrap_err();
        assert!(matches!(err, Error::Enumeration(DeviceError { code: 5, .. })));
    }

    #[tokio::test]
    async fn test_query_all() {
        let bridge = Bridge::new(MemoryBackend::with_interfaces(["wg0", "wg1"]));
        let private = Key::generate_private();

        bridge
            .configure_task("wg1", &json!({ "privateKey": private.to_string(), "fwmark": 51820 }))
            .run()
            .await
            .unwrap();

        let all = bridge.query_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["wg0"], json!({ "peers": {} }));
        assert_eq!(all["wg1"]["fwmark"], json!(51820));
        assert_eq!(
            all["wg1"]["publicKey"],
            json!(private.public_key().to_string())
        );
    }
}
