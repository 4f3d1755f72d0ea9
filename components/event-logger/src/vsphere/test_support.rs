//! A canned vCenter SDK endpoint for client tests.

// Local crates
use crate::vsphere::{
    client::{ClientOptions, Endpoint},
    soap::{envelope, parse_document},
};

// External crates
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    Request, Response,
    body::Incoming,
    header::CONTENT_TYPE,
    service::service_fn,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as HyperServerBuilder,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

type Calls = Arc<Mutex<Vec<(String, String)>>>;

pub struct MockVcenter {
    addr: SocketAddr,
    calls: Calls,
    handle: JoinHandle<()>,
}

impl Drop for MockVcenter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockVcenter {
    /// Serve SOAP calls on a random local port. `responder` gets the method
    /// name and the raw request body and returns `(status, body)`.
    pub async fn spawn<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        Self::serve(responder, None).await
    }

    /// Like [`MockVcenter::spawn`], but `operation` answers only after `delay`.
    pub async fn spawn_slow<F>(responder: F, operation: &'static str, delay: Duration) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        Self::serve(responder, Some((operation, delay))).await
    }

    async fn serve<F>(responder: F, slow: Option<(&'static str, Duration)>) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let responder = Arc::new(responder);

        let handle = tokio::spawn({
            let calls = calls.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let calls = calls.clone();
                    let responder = responder.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let calls = calls.clone();
                            let responder = responder.clone();
                            async move {
                                let bytes = req
                                    .into_body()
                                    .collect()
                                    .await
                                    .map(|c| c.to_bytes())
                                    .unwrap_or_default();
                                let body = String::from_utf8_lossy(&bytes).into_owned();
                                let operation = operation_name(&body);
                                calls
                                    .lock()
                                    .unwrap()
                                    .push((operation.clone(), body.clone()));

                                if let Some((slow_operation, delay)) = slow {
                                    if operation == slow_operation {
                                        tokio::time::sleep(delay).await;
                                    }
                                }
                                let (status, xml) = responder(&operation, &body);
                                Ok::<_, Infallible>(
                                    Response::builder()
                                        .status(status)
                                        .header(CONTENT_TYPE, "text/xml; charset=utf-8")
                                        .body(Full::new(Bytes::from(xml)))
                                        .unwrap(),
                                )
                            }
                        });
                        let _ = HyperServerBuilder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
            }
        });

        Self {
            addr,
            calls,
            handle,
        }
    }

    pub fn url(&self, user: &str, password: &str) -> String {
        let credentials = if user.is_empty() {
            String::new()
        } else {
            format!("{user}:{password}@")
        };
        format!("http://{credentials}{}/sdk", self.addr)
    }

    pub fn endpoint(&self, user: &str, password: &str) -> Endpoint {
        Endpoint::parse(&self.url(user, password)).unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(op, _)| op.clone())
            .collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn ok(operation: &str, inner: &str) -> (u16, String) {
        (
            200,
            envelope(&format!(
                "<{operation}Response xmlns=\"urn:vim25\">{inner}</{operation}Response>"
            )),
        )
    }

    pub fn fault(message: &str) -> (u16, String) {
        (
            500,
            envelope(&format!(
                "<soapenv:Fault><faultcode>ServerFaultCode</faultcode>\
                 <faultstring>{message}</faultstring><detail/></soapenv:Fault>"
            )),
        )
    }
}

fn operation_name(body: &str) -> String {
    parse_document(body)
        .ok()
        .and_then(|doc| {
            doc.path(&["Envelope", "Body"])
                .and_then(|b| b.children.first())
                .map(|n| n.name.clone())
        })
        .unwrap_or_default()
}

pub fn options() -> ClientOptions {
    ClientOptions {
        insecure: false,
        api_version: "7.0".into(),
        request_timeout: Duration::from_secs(5),
    }
}

/// Datacenters directly under the root folder `group-d1`.
pub fn datacenter_objects(datacenters: &[(&str, &str)]) -> String {
    datacenters
        .iter()
        .map(|(id, name)| nested_datacenter_object(id, name, "group-d1"))
        .collect()
}

pub fn nested_datacenter_object(id: &str, name: &str, folder: &str) -> String {
    format!(
        "<objects><obj type=\"Datacenter\">{id}</obj>\
         <propSet><name>name</name><val xsi:type=\"xsd:string\">{name}</val></propSet>\
         <propSet><name>parent</name>\
         <val type=\"Folder\" xsi:type=\"ManagedObjectReference\">{folder}</val></propSet>\
         </objects>"
    )
}

pub fn generic_event_xml(type_name: &str, message: &str, created: &str) -> String {
    format!(
        "<returnval xsi:type=\"{type_name}\"><key>101</key><chainId>101</chainId>\
         <createdTime>{created}</createdTime><userName></userName>\
         <datacenter><name>DC1</name><datacenter type=\"Datacenter\">datacenter-2</datacenter></datacenter>\
         <host><name>esx01</name><host type=\"HostSystem\">host-10</host></host>\
         <vm><name>web-01</name><vm type=\"VirtualMachine\">vm-42</vm></vm>\
         <fullFormattedMessage>{message}</fullFormattedMessage></returnval>"
    )
}

pub fn task_event_xml(target_type: &str, target_name: &str, message: &str) -> String {
    format!(
        "<returnval xsi:type=\"TaskEvent\"><key>102</key><chainId>102</chainId>\
         <createdTime>2024-01-01T00:00:05Z</createdTime><userName>VSPHERE.LOCAL\\admin</userName>\
         <fullFormattedMessage>{message}</fullFormattedMessage>\
         <info><key>task-7</key><task type=\"Task\">task-7</task><name>PowerOnVM_Task</name>\
         <descriptionId>VirtualMachine.powerOn</descriptionId>\
         <entity type=\"{target_type}\">vm-42</entity><entityName>{target_name}</entityName>\
         <state>running</state></info></returnval>"
    )
}

/// Answers every call the event logger makes with a healthy single
/// datacenter inventory and two events.
pub fn default_responder() -> impl Fn(&str, &str) -> (u16, String) + Send + Sync + 'static {
    |operation: &str, body: &str| match operation {
        "RetrieveServiceContent" => MockVcenter::ok(
            operation,
            "<returnval>\
             <rootFolder type=\"Folder\">group-d1</rootFolder>\
             <propertyCollector type=\"PropertyCollector\">propertyCollector</propertyCollector>\
             <about><fullName>VMware vCenter Server 7.0.3</fullName></about>\
             <sessionManager type=\"SessionManager\">SessionManager</sessionManager>\
             <eventManager type=\"EventManager\">EventManager</eventManager>\
             </returnval>",
        ),
        "Login" => MockVcenter::ok(
            operation,
            "<returnval><key>52b1</key><userName>VSPHERE.LOCAL\\admin</userName></returnval>",
        ),
        "RetrievePropertiesEx" if body.contains("description.eventInfo") => MockVcenter::ok(
            operation,
            "<returnval><objects><obj type=\"EventManager\">EventManager</obj>\
             <propSet><name>description.eventInfo</name>\
             <val xsi:type=\"ArrayOfEventDescriptionEventDetail\">\
             <EventDescriptionEventDetail xsi:type=\"EventDescriptionEventDetail\">\
             <key>VmPoweredOnEvent</key><description>VM powered on</description><category>info</category>\
             </EventDescriptionEventDetail>\
             <EventDescriptionEventDetail xsi:type=\"EventDescriptionEventDetail\">\
             <key>TaskEvent</key><description>Task event</description><category>info</category>\
             </EventDescriptionEventDetail>\
             <EventDescriptionEventDetail xsi:type=\"EventDescriptionEventDetail\">\
             <key>BadUsernameSessionEvent</key><description>Invalid user name</description><category>error</category>\
             </EventDescriptionEventDetail>\
             </val></propSet></objects></returnval>",
        ),
        "RetrievePropertiesEx" => MockVcenter::ok(
            operation,
            &format!(
                "<returnval>{}</returnval>",
                datacenter_objects(&[("datacenter-2", "DC1")])
            ),
        ),
        "CreateCollectorForEvents" => MockVcenter::ok(
            operation,
            "<returnval type=\"EventHistoryCollector\">session[52b1]5</returnval>",
        ),
        "ReadNextEvents" => MockVcenter::ok(
            operation,
            &format!(
                "{}{}",
                generic_event_xml("VmPoweredOnEvent", "  VM powered on  ", "2024-01-01T00:00:00Z"),
                task_event_xml("VirtualMachine", "web-01", "Task: Power On")
            ),
        ),
        "SetCollectorPageSize" | "ResetCollector" | "DestroyCollector" | "Logout" => {
            MockVcenter::ok(operation, "")
        }
        other => MockVcenter::fault(&format!("unexpected method {other}")),
    }
}
