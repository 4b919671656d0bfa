//! Concept façade and remote type handles
//!
//! [`Type`] and [`Thing`] are plain snapshots. Anything that asks the server
//! goes through a handle that borrows the open transaction, so a handle can
//! never outlive the transaction it was created from.

use super::Transaction;
use crate::concept::{Label, Thing, Type, ValueType};
use crate::types::{ClientError, Result};
use crate::wire::{ConceptRequest, Request, Response, TypeOp};

/// Schema and data lookups within one transaction
pub struct ConceptManager<'a> {
    transaction: &'a Transaction,
}

impl<'a> ConceptManager<'a> {
    pub(crate) fn new(transaction: &'a Transaction) -> Self {
        Self { transaction }
    }

    pub async fn get_thing_type(&self, label: &str) -> Result<Option<Type>> {
        let request = ConceptRequest::GetThingType { label: label.to_string() };
        expect_type(self.execute(request).await?)
    }

    pub async fn get_thing(&self, iid: &[u8]) -> Result<Option<Thing>> {
        match self.execute(ConceptRequest::GetThing { iid: iid.to_vec() }).await? {
            Response::Thing(thing) => Ok(thing),
            _ => Err(ClientError::missing_response("thing")),
        }
    }

    /// Look a thing up by its hex-encoded IID
    pub async fn get_thing_by_hex(&self, iid: &str) -> Result<Option<Thing>> {
        let iid = hex::decode(iid.trim_start_matches("0x"))
            .map_err(|e| ClientError::IllegalState(format!("Invalid IID '{}': {}", iid, e)))?;
        self.get_thing(&iid).await
    }

    pub async fn put_entity_type(&self, label: &str) -> Result<Type> {
        let request = ConceptRequest::PutEntityType { label: label.to_string() };
        require_type(self.execute(request).await?)
    }

    pub async fn put_relation_type(&self, label: &str) -> Result<Type> {
        let request = ConceptRequest::PutRelationType { label: label.to_string() };
        require_type(self.execute(request).await?)
    }

    pub async fn put_attribute_type(&self, label: &str, value_type: ValueType) -> Result<Type> {
        let request = ConceptRequest::PutAttributeType { label: label.to_string(), value_type };
        require_type(self.execute(request).await?)
    }

    /// Remote handle for any type
    pub fn remote(&self, ty: &Type) -> RemoteType<'a> {
        RemoteType { transaction: self.transaction, ty: ty.clone() }
    }

    /// Remote handle for a role type; fails for any other kind of type
    pub fn remote_role(&self, ty: &Type) -> Result<RemoteRoleType<'a>> {
        if !ty.is_role_type() {
            return Err(ClientError::IllegalState(format!("'{}' is not a role type", ty.label)));
        }
        Ok(RemoteRoleType { inner: self.remote(ty) })
    }

    async fn execute(&self, request: ConceptRequest) -> Result<Response> {
        self.transaction.execute(Request::Concept(request)).await
    }
}

/// Type operations that require the server
pub struct RemoteType<'a> {
    transaction: &'a Transaction,
    ty: Type,
}

impl<'a> RemoteType<'a> {
    /// Snapshot of the type as last seen by this handle
    pub fn get(&self) -> &Type {
        &self.ty
    }

    pub fn label(&self) -> &Label {
        &self.ty.label
    }

    pub async fn delete(&self) -> Result {
        expect_unit(self.op(TypeOp::Delete).await?)
    }

    pub async fn is_deleted(&self) -> Result<bool> {
        let manager = ConceptManager::new(self.transaction);
        let lookup = match &self.ty.label.scope {
            Some(scope) => manager.get_thing_type(scope).await?,
            None => manager.get_thing_type(&self.ty.label.name).await?,
        };
        if self.ty.is_role_type() {
            let Some(relation) = lookup else {
                return Ok(true);
            };
            let relates = manager
                .remote(&relation)
                .get_relates(&self.ty.label.name)
                .await?;
            Ok(relates.is_none())
        } else {
            Ok(lookup.is_none())
        }
    }

    pub async fn set_label(&mut self, new_label: &str) -> Result {
        expect_unit(self.op(TypeOp::SetLabel { new_label: new_label.to_string() }).await?)?;
        self.ty.label.name = new_label.to_string();
        Ok(())
    }

    pub async fn set_abstract(&mut self) -> Result {
        expect_unit(self.op(TypeOp::SetAbstract).await?)?;
        self.ty.is_abstract = true;
        Ok(())
    }

    pub async fn unset_abstract(&mut self) -> Result {
        expect_unit(self.op(TypeOp::UnsetAbstract).await?)?;
        self.ty.is_abstract = false;
        Ok(())
    }

    pub async fn get_supertype(&self) -> Result<Option<Type>> {
        expect_type(self.op(TypeOp::GetSupertype).await?)
    }

    pub async fn get_supertypes(&self) -> Result<Vec<Type>> {
        expect_types(self.op(TypeOp::GetSupertypes).await?)
    }

    pub async fn get_subtypes(&self) -> Result<Vec<Type>> {
        expect_types(self.op(TypeOp::GetSubtypes).await?)
    }

    pub async fn get_subtypes_explicit(&self) -> Result<Vec<Type>> {
        expect_types(self.op(TypeOp::GetSubtypesExplicit).await?)
    }

    pub async fn get_instances(&self) -> Result<Vec<Thing>> {
        expect_things(self.op(TypeOp::GetInstances).await?)
    }

    /// Role of a relation type by its unscoped name
    pub async fn get_relates(&self, role_name: &str) -> Result<Option<Type>> {
        expect_type(self.op(TypeOp::GetRelates { role_name: role_name.to_string() }).await?)
    }

    async fn op(&self, op: TypeOp) -> Result<Response> {
        self.transaction
            .execute(Request::Concept(ConceptRequest::Type { label: self.ty.label.clone(), op }))
            .await
    }
}

/// Role type traversals on top of the common type operations
pub struct RemoteRoleType<'a> {
    inner: RemoteType<'a>,
}

impl<'a> RemoteRoleType<'a> {
    pub fn as_remote_type(&mut self) -> &mut RemoteType<'a> {
        &mut self.inner
    }

    pub fn get(&self) -> &Type {
        self.inner.get()
    }

    /// Relation type that scopes this role
    pub async fn get_relation_type(&self) -> Result<Option<Type>> {
        match &self.inner.ty.label.scope {
            Some(scope) => ConceptManager::new(self.inner.transaction).get_thing_type(scope).await,
            None => Ok(None),
        }
    }

    pub async fn get_relation_types(&self) -> Result<Vec<Type>> {
        expect_types(self.inner.op(TypeOp::GetRelationTypes).await?)
    }

    pub async fn get_player_types(&self) -> Result<Vec<Type>> {
        expect_types(self.inner.op(TypeOp::GetPlayerTypes).await?)
    }

    pub async fn get_player_types_explicit(&self) -> Result<Vec<Type>> {
        expect_types(self.inner.op(TypeOp::GetPlayerTypesExplicit).await?)
    }

    pub async fn get_relation_instances(&self) -> Result<Vec<Thing>> {
        expect_things(self.inner.op(TypeOp::GetRelationInstances).await?)
    }

    pub async fn get_relation_instances_explicit(&self) -> Result<Vec<Thing>> {
        expect_things(self.inner.op(TypeOp::GetRelationInstancesExplicit).await?)
    }

    pub async fn get_player_instances(&self) -> Result<Vec<Thing>> {
        expect_things(self.inner.op(TypeOp::GetPlayerInstances).await?)
    }

    pub async fn get_player_instances_explicit(&self) -> Result<Vec<Thing>> {
        expect_things(self.inner.op(TypeOp::GetPlayerInstancesExplicit).await?)
    }
}

fn expect_unit(response: Response) -> Result {
    match response {
        Response::Unit => Ok(()),
        _ => Err(ClientError::missing_response("acknowledgement")),
    }
}

fn expect_type(response: Response) -> Result<Option<Type>> {
    match response {
        Response::Type(ty) => Ok(ty),
        _ => Err(ClientError::missing_response("type")),
    }
}

fn require_type(response: Response) -> Result<Type> {
    expect_type(response)?.ok_or_else(|| ClientError::missing_response("type"))
}

fn expect_types(response: Response) -> Result<Vec<Type>> {
    match response {
        Response::Types(types) => Ok(types),
        _ => Err(ClientError::missing_response("types")),
    }
}

fn expect_things(response: Response) -> Result<Vec<Thing>> {
    match response {
        Response::Things(things) => Ok(things),
        _ => Err(ClientError::missing_response("things")),
    }
}
