// Local crates
use crate::vsphere::{
    client::VimClient,
    models::{Datacenter, ManagedObjectReference, VimError},
    soap::{SoapRequest, XmlNode},
};

// External crates
use tracing::instrument;

/// Walks `Folder.childEntity` from the root folder, through nested folders,
/// and reports `name` and `parent` of every Datacenter it reaches.
fn datacenter_filter_spec(root_folder: &str) -> String {
    format!(
        concat!(
            "<specSet>",
            "<propSet><type>Datacenter</type><pathSet>name</pathSet><pathSet>parent</pathSet></propSet>",
            "<objectSet>{root}<skip>true</skip>",
            "<selectSet xsi:type=\"TraversalSpec\">",
            "<name>folderTraversal</name><type>Folder</type><path>childEntity</path>",
            "<skip>false</skip><selectSet><name>folderTraversal</name></selectSet>",
            "</selectSet>",
            "</objectSet>",
            "</specSet>",
            "<options></options>"
        ),
        root = root_folder
    )
}

impl VimClient {
    /// List every datacenter in the inventory.
    #[instrument(
        name = "vcel_vsphere::datacenters",
        target = "vsphere::inventory",
        skip_all,
        level = "debug"
    )]
    pub async fn datacenters(&self) -> Result<Vec<Datacenter>, VimError> {
        let collector = &self.content.property_collector;
        let spec = datacenter_filter_spec(&self.content.root_folder.to_xml("obj"));

        let mut response = self
            .invoke(SoapRequest::new("RetrievePropertiesEx", collector).raw(&spec))
            .await?;

        let mut found = Vec::new();
        loop {
            let Some(result) = response.child("returnval") else {
                break;
            };
            found.extend(result.children_named("objects").filter_map(decode_datacenter));

            let Some(token) = result.text_at(&["token"]).filter(|t| !t.is_empty()) else {
                break;
            };
            let request =
                SoapRequest::new("ContinueRetrievePropertiesEx", collector).element("token", token);
            response = self.invoke(request).await?;
        }

        tracing::debug!(count = found.len(), "Datacenters discovered");
        Ok(found)
    }

    /// Pick the datacenter to tail: the named one anywhere in the
    /// inventory, or the only one directly under the root folder when no
    /// name is given.
    pub async fn find_datacenter(&self, name: Option<&str>) -> Result<Datacenter, VimError> {
        let datacenters = self.datacenters().await?;
        select_datacenter(datacenters, name, &self.content.root_folder)
    }
}

fn decode_datacenter(object: &XmlNode) -> Option<Datacenter> {
    let reference = object.child("obj").and_then(XmlNode::as_moref)?;
    if reference.kind != "Datacenter" {
        return None;
    }
    let property = |key: &str| {
        object
            .children_named("propSet")
            .find(|p| p.text_at(&["name"]) == Some(key))
            .and_then(|p| p.child("val"))
    };
    let name = property("name")
        .map(|val| val.text.clone())
        .unwrap_or_default();
    let parent = property("parent").and_then(XmlNode::as_moref);
    Some(Datacenter {
        reference,
        name,
        parent,
    })
}

pub fn select_datacenter(
    datacenters: Vec<Datacenter>,
    name: Option<&str>,
    root_folder: &ManagedObjectReference,
) -> Result<Datacenter, VimError> {
    if let Some(name) = name {
        return datacenters
            .into_iter()
            .find(|dc| dc.name == name)
            .ok_or_else(|| VimError::DatacenterNotFound(name.to_string()));
    }

    let mut datacenters: Vec<Datacenter> = datacenters
        .into_iter()
        .filter(|dc| dc.parent.as_ref() == Some(root_folder))
        .collect();
    match datacenters.len() {
        0 => Err(VimError::NoDatacenter),
        1 => datacenters.pop().ok_or(VimError::NoDatacenter),
        _ => Err(VimError::MultipleDatacenters(
            datacenters
                .iter()
                .map(|dc| dc.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}
